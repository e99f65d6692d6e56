//! Guest-register cache.
//!
//! Maps the 34 guest register slots onto the virtual host registers during
//! emission. Reservations pin a mapping for the current opcode; freed
//! mappings stay cached for reuse until evicted or spilled. Allocation is
//! LRU over two pools: the callee-saved `V` registers are preferred, and
//! guest values may overflow into the caller-saved scratch pool, from which
//! they are flushed around helper calls.
//!
//! A [`Snapshot`] captures the whole allocation state before a conditional
//! branch so the not-taken path resumes emission from the same mapping the
//! taken path saw.

use crate::rec::builder::{CodeBuilder, HostReg, StateField, REG_CYCLE, T0, T2, V0, V5};

const V_POOL: std::ops::RangeInclusive<HostReg> = V0..=V5;
const T_POOL: std::ops::RangeInclusive<HostReg> = T0..=T2;

#[derive(Clone, Copy, Debug, Default)]
struct Entry {
    /// Guest slot cached in this host register, if any.
    guest: Option<u8>,
    /// Claimed as a scratch value not tied to a guest register.
    temp: bool,
    /// Reserved by the opcode currently being emitted.
    locked: bool,
    /// Host register holds a value not yet stored to the guest file.
    dirty: bool,
    /// LRU stamp.
    stamp: u64,
}

/// Full copy of the allocation state, taken at a branch fork.
#[derive(Clone, Debug)]
pub struct Snapshot {
    entries: [Entry; crate::rec::builder::NUM_HOST_REGS],
    clock: u64,
}

/// Per-compilation register cache.
#[derive(Debug)]
pub struct RegCache {
    entries: [Entry; crate::rec::builder::NUM_HOST_REGS],
    clock: u64,
}

impl RegCache {
    /// Fresh cache with no mappings; built once per block compilation.
    pub fn new() -> Self {
        Self {
            entries: Default::default(),
            clock: 0,
        }
    }

    fn touch(&mut self, hw: HostReg) {
        self.clock += 1;
        self.entries[hw as usize].stamp = self.clock;
    }

    fn find_guest(&self, guest: u8) -> Option<HostReg> {
        (0..self.entries.len())
            .find(|&i| self.entries[i].guest == Some(guest) && i != REG_CYCLE as usize)
            .map(|i| i as HostReg)
    }

    /// Emits the spill for a dirty mapping and marks it clean.
    fn spill(&mut self, b: &mut CodeBuilder, hw: HostReg) {
        let entry = &mut self.entries[hw as usize];
        if entry.dirty {
            if let Some(guest) = entry.guest {
                if guest != 0 {
                    b.st_state(StateField::Gpr(guest), hw);
                }
            }
            entry.dirty = false;
        }
    }

    fn evict(&mut self, b: &mut CodeBuilder, hw: HostReg) {
        self.spill(b, hw);
        self.entries[hw as usize] = Entry::default();
    }

    /// Picks a host register: first free slot pool-by-pool, else the least
    /// recently used unlocked mapping, which gets evicted.
    fn pick(&mut self, b: &mut CodeBuilder) -> HostReg {
        for hw in V_POOL.chain(T_POOL) {
            let entry = &self.entries[hw as usize];
            if !entry.locked && !entry.temp && entry.guest.is_none() {
                return hw;
            }
        }

        let lru = V_POOL
            .chain(T_POOL)
            .filter(|&hw| !self.entries[hw as usize].locked)
            .min_by_key(|&hw| self.entries[hw as usize].stamp);
        let Some(hw) = lru else {
            unreachable!("register cache exhausted: every host register is locked");
        };
        self.evict(b, hw);
        hw
    }

    /// Reserves a host register holding the current value of `guest`.
    ///
    /// Loads from the guest file when the value is not already cached.
    /// Reads of register 0 synthesize a zero operand.
    pub fn reserve_in(&mut self, b: &mut CodeBuilder, guest: u8) -> HostReg {
        if let Some(hw) = self.find_guest(guest) {
            self.entries[hw as usize].locked = true;
            self.touch(hw);
            return hw;
        }

        let hw = self.pick(b);
        if guest == 0 {
            b.movi(hw, 0);
        } else {
            b.ld_state(hw, StateField::Gpr(guest));
        }
        self.entries[hw as usize] = Entry {
            guest: Some(guest),
            locked: true,
            ..Entry::default()
        };
        self.touch(hw);
        hw
    }

    /// Reserves a host register that will receive a new value for `guest`.
    ///
    /// Write-only: a previously cached value is discarded, not reloaded.
    /// Writes to register 0 are dropped by handing out a scratch register
    /// that is never stored back.
    pub fn reserve_out(&mut self, b: &mut CodeBuilder, guest: u8) -> HostReg {
        if guest == 0 {
            let hw = self.pick(b);
            self.entries[hw as usize] = Entry {
                temp: true,
                locked: true,
                ..Entry::default()
            };
            self.touch(hw);
            return hw;
        }

        if let Some(hw) = self.find_guest(guest) {
            let entry = &mut self.entries[hw as usize];
            entry.dirty = true;
            entry.locked = true;
            self.touch(hw);
            return hw;
        }

        let hw = self.pick(b);
        self.entries[hw as usize] = Entry {
            guest: Some(guest),
            dirty: true,
            locked: true,
            ..Entry::default()
        };
        self.touch(hw);
        hw
    }

    /// Like [`Self::reserve_in`], but into the specific register `hw`,
    /// moving or reloading the value as needed. `hw` must not be locked.
    pub fn request_specific_in(
        &mut self,
        b: &mut CodeBuilder,
        guest: u8,
        hw: HostReg,
    ) -> HostReg {
        assert!(!self.entries[hw as usize].locked, "host register in use");

        if self.entries[hw as usize].guest == Some(guest) {
            self.entries[hw as usize].locked = true;
            self.touch(hw);
            return hw;
        }

        self.evict(b, hw);

        if let Some(src) = self.find_guest(guest) {
            b.mov(hw, src);
            self.entries[hw as usize] = Entry {
                locked: true,
                ..self.entries[src as usize]
            };
            self.entries[src as usize] = Entry::default();
        } else {
            if guest == 0 {
                b.movi(hw, 0);
            } else {
                b.ld_state(hw, StateField::Gpr(guest));
            }
            self.entries[hw as usize] = Entry {
                guest: Some(guest),
                locked: true,
                ..Entry::default()
            };
        }
        self.touch(hw);
        hw
    }

    /// Claims `hw` as an anonymous scratch register, evicting its mapping.
    pub fn claim(&mut self, b: &mut CodeBuilder, hw: HostReg) -> HostReg {
        assert!(!self.entries[hw as usize].locked, "host register in use");
        self.evict(b, hw);
        self.entries[hw as usize] = Entry {
            temp: true,
            locked: true,
            ..Entry::default()
        };
        self.touch(hw);
        hw
    }

    /// Allocates a scratch register not tied to any guest register.
    pub fn alloc_temp(&mut self, b: &mut CodeBuilder) -> HostReg {
        let hw = self.pick(b);
        self.entries[hw as usize] = Entry {
            temp: true,
            locked: true,
            ..Entry::default()
        };
        self.touch(hw);
        hw
    }

    /// Releases a reservation. Guest mappings stay cached; scratch
    /// registers return to the free pool.
    pub fn free(&mut self, hw: HostReg) {
        let entry = &mut self.entries[hw as usize];
        entry.locked = false;
        if entry.temp {
            *entry = Entry::default();
        }
    }

    /// Releases every reservation and scratch claim.
    pub fn free_all(&mut self) {
        for entry in &mut self.entries {
            entry.locked = false;
            if entry.temp {
                *entry = Entry::default();
            }
        }
    }

    /// Spills (if dirty) and evicts the mapping for `guest`, if cached.
    pub fn unload_guest(&mut self, b: &mut CodeBuilder, guest: u8) {
        if let Some(hw) = self.find_guest(guest) {
            self.evict(b, hw);
        }
    }

    /// Spills every dirty mapping to the guest file. Idempotent: a second
    /// call emits nothing.
    pub fn storeback_all(&mut self, b: &mut CodeBuilder) {
        for hw in 0..self.entries.len() as HostReg {
            self.spill(b, hw);
        }
    }

    /// Flushes guest values out of the caller-saved pool after a helper
    /// call; their host registers are clobbered by convention.
    pub fn mark_live_after_call(&mut self, b: &mut CodeBuilder) {
        for hw in T_POOL {
            let entry = &self.entries[hw as usize];
            if entry.guest.is_some() && !entry.locked {
                self.evict(b, hw);
            }
        }
    }

    /// Captures the full allocation state at a branch fork.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: self.entries,
            clock: self.clock,
        }
    }

    /// Restores the allocation state captured by [`Self::snapshot`].
    pub fn restore(&mut self, snapshot: &Snapshot) {
        self.entries = snapshot.entries;
        self.clock = snapshot.clock;
    }
}

impl Default for RegCache {
    fn default() -> Self {
        Self::new()
    }
}
