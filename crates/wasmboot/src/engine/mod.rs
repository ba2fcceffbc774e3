use wasmparser::{Validator, WasmFeatures};

/// Maximum call depth before trapping with `CallStackExhausted`.
/// The interpreter uses one Rust frame per wasm call, so this also bounds
/// native stack usage.
const DEFAULT_MAX_CALL_DEPTH: u32 = 1_000;

/// Shared compilation configuration.
#[derive(Debug, Clone)]
pub struct Engine {
    features: WasmFeatures,
    max_call_depth: u32,
}

impl Engine {
    /// Create a new validator with the engine's features.
    pub fn new_validator(&self) -> Validator {
        Validator::new_with_features(self.features)
    }

    /// Override the interpreter's call depth limit.
    pub fn with_max_call_depth(mut self, depth: u32) -> Self {
        self.max_call_depth = depth.max(1);
        self
    }

    pub fn max_call_depth(&self) -> u32 {
        self.max_call_depth
    }
}

impl Default for Engine {
    fn default() -> Self {
        let mut features = WasmFeatures::default();
        // Struct and array types have no representation in the interpreter.
        features.set(WasmFeatures::GC, false);
        // `try`/`try_table` open blocks the body lowering cannot pair.
        features.set(WasmFeatures::EXCEPTIONS, false);
        features.set(WasmFeatures::LEGACY_EXCEPTIONS, false);
        // Addresses and `memory.grow` operands are 32-bit in the interpreter.
        features.set(WasmFeatures::MEMORY64, false);
        Self {
            features,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}
