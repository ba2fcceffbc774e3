use crate::Engine;

/// Host state for a WASM instance: user data plus the execution budget.
pub struct Store<T> {
    data: T,
    /// Remaining instructions, or `None` for an unbounded budget.
    fuel: Option<u64>,
    pub(crate) max_call_depth: u32,
}

impl<T> Store<T> {
    pub fn new(engine: &Engine, data: T) -> Self {
        Self {
            data,
            fuel: None,
            max_call_depth: engine.max_call_depth(),
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Bound every subsequent call to `fuel` executed instructions in total.
    pub fn set_fuel(&mut self, fuel: Option<u64>) {
        self.fuel = fuel;
    }

    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }

    /// Spend one unit of fuel. Returns `false` once the budget is exhausted.
    #[inline(always)]
    pub(crate) fn consume_fuel(&mut self) -> bool {
        match &mut self.fuel {
            None => true,
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }
}
