use crate::Val;

const INITIAL_SLOTS: usize = 1024;

/// Operand stack shared by every frame of one call.
///
/// All values are stored as 8-byte (u64) slots; the static types from
/// validation say how to interpret them.
///
/// Pops never fail: validation guarantees operand stack balance for
/// well-formed modules, and an empty pop yields a zero slot rather than
/// panicking on guest input.
pub(crate) struct Stack {
    slots: Vec<u64>,
}

impl Stack {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::with_capacity(INITIAL_SLOTS),
        }
    }

    /// Current height in slots.
    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub(crate) fn push(&mut self, val: u64) {
        self.slots.push(val);
    }

    #[inline(always)]
    pub(crate) fn pop(&mut self) -> u64 {
        self.slots.pop().unwrap_or_default()
    }

    #[inline(always)]
    pub(crate) fn peek(&self) -> u64 {
        self.slots.last().copied().unwrap_or_default()
    }

    #[inline(always)]
    pub(crate) fn push_i32(&mut self, val: i32) {
        self.push(val as u32 as u64);
    }

    #[inline(always)]
    pub(crate) fn pop_i32(&mut self) -> i32 {
        self.pop() as u32 as i32
    }

    #[inline(always)]
    pub(crate) fn push_i64(&mut self, val: i64) {
        self.push(val as u64);
    }

    #[inline(always)]
    pub(crate) fn pop_i64(&mut self) -> i64 {
        self.pop() as i64
    }

    #[inline(always)]
    pub(crate) fn push_f32(&mut self, val: f32) {
        self.push(val.to_bits() as u64);
    }

    #[inline(always)]
    pub(crate) fn pop_f32(&mut self) -> f32 {
        f32::from_bits(self.pop() as u32)
    }

    #[inline(always)]
    pub(crate) fn push_f64(&mut self, val: f64) {
        self.push(val.to_bits());
    }

    #[inline(always)]
    pub(crate) fn pop_f64(&mut self) -> f64 {
        f64::from_bits(self.pop())
    }

    pub(crate) fn push_val(&mut self, val: &Val) {
        self.push(val.to_raw());
    }

    /// Remove and return the top `n` slots, bottom first.
    pub(crate) fn pop_n(&mut self, n: usize) -> Vec<u64> {
        let at = self.slots.len().saturating_sub(n);
        self.slots.split_off(at)
    }

    /// Keep the top `arity` slots and discard everything between them and
    /// `height`. Used when leaving a block or function.
    pub(crate) fn unwind(&mut self, height: usize, arity: usize) {
        let len = self.slots.len();
        if len < height + arity {
            return;
        }
        let keep_from = len - arity;
        if keep_from != height {
            self.slots.copy_within(keep_from..len, height);
        }
        self.slots.truncate(height + arity);
    }

    pub(crate) fn truncate(&mut self, height: usize) {
        self.slots.truncate(height);
    }
}
