use std::fmt;

use wasmparser::{RefType, ValType};

/// Dynamic WASM value for untyped function calls and host bindings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// A function reference: `None` is `ref.null func`, otherwise the
    /// function index inside the owning instance.
    FuncRef(Option<u32>),
}

/// A Rust scalar that maps onto one wasm value type.
pub trait WasmVal: Sized {
    fn to_val(&self) -> Val;
    fn from_val(val: &Val) -> Result<Self, anyhow::Error>;
}

macro_rules! scalar_val {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl WasmVal for $ty {
            fn to_val(&self) -> Val {
                Val::$variant(*self)
            }
            fn from_val(val: &Val) -> Result<Self, anyhow::Error> {
                match val {
                    Val::$variant(v) => Ok(*v),
                    other => anyhow::bail!("expected {}, got {other}", stringify!($ty)),
                }
            }
        }
    )*};
}

scalar_val!(i32 => I32, i64 => I64, f32 => F32, f64 => F64);

/// Arguments for a typed call: `()` or a tuple of [`WasmVal`]s.
pub trait WasmArgs {
    fn to_vals(&self) -> Vec<Val>;
}

/// Results of a typed call: `()` or a tuple of [`WasmVal`]s.
pub trait WasmResults: Sized {
    fn from_vals(vals: &[Val]) -> Result<Self, anyhow::Error>;
}

impl WasmArgs for () {
    fn to_vals(&self) -> Vec<Val> {
        Vec::new()
    }
}

impl WasmResults for () {
    fn from_vals(vals: &[Val]) -> Result<Self, anyhow::Error> {
        anyhow::ensure!(vals.is_empty(), "expected no results, got {}", vals.len());
        Ok(())
    }
}

macro_rules! tuple_vals {
    ($len:literal: $($name:ident),+) => {
        impl<$($name: WasmVal),+> WasmArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn to_vals(&self) -> Vec<Val> {
                let ($($name,)+) = self;
                vec![$($name.to_val()),+]
            }
        }

        impl<$($name: WasmVal),+> WasmResults for ($($name,)+) {
            fn from_vals(vals: &[Val]) -> Result<Self, anyhow::Error> {
                anyhow::ensure!(
                    vals.len() == $len,
                    "expected {} results, got {}",
                    $len,
                    vals.len()
                );
                let mut vals = vals.iter();
                Ok(($(
                    $name::from_val(vals.next().ok_or_else(|| anyhow::anyhow!("missing result"))?)?,
                )+))
            }
        }
    };
}

tuple_vals!(1: A);
tuple_vals!(2: A, B);
tuple_vals!(3: A, B, C);
tuple_vals!(4: A, B, C, D);

impl Val {
    pub fn zero_for(ty: &ValType) -> Val {
        match ty {
            ValType::I32 => Val::I32(0),
            ValType::I64 => Val::I64(0),
            ValType::F32 => Val::F32(0.0),
            ValType::F64 => Val::F64(0.0),
            ValType::V128 | ValType::Ref(_) => Val::FuncRef(None),
        }
    }

    /// The value type this value inhabits.
    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
            Val::FuncRef(_) => ValType::Ref(RefType::FUNCREF),
        }
    }

    /// Whether this value can be stored in a slot of type `ty`.
    pub fn matches(&self, ty: &ValType) -> bool {
        match (self, ty) {
            (Val::FuncRef(_), ValType::Ref(_)) => true,
            _ => self.ty() == *ty,
        }
    }

    /// Encode into an untyped 8-byte interpreter slot.
    pub(crate) fn to_raw(self) -> u64 {
        match self {
            Val::I32(v) => v as u32 as u64,
            Val::I64(v) => v as u64,
            Val::F32(v) => v.to_bits() as u64,
            Val::F64(v) => v.to_bits(),
            Val::FuncRef(None) => 0,
            Val::FuncRef(Some(idx)) => idx as u64 + 1,
        }
    }

    /// Decode an interpreter slot, interpreting the raw bits by `ty`.
    pub(crate) fn from_raw(raw: u64, ty: &ValType) -> Val {
        match ty {
            ValType::I32 => Val::I32(raw as u32 as i32),
            ValType::I64 => Val::I64(raw as i64),
            ValType::F32 => Val::F32(f32::from_bits(raw as u32)),
            ValType::F64 => Val::F64(f64::from_bits(raw)),
            ValType::V128 | ValType::Ref(_) => Val::FuncRef(raw.checked_sub(1).map(|i| i as u32)),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::I32(v) => write!(f, "{v}:i32"),
            Val::I64(v) => write!(f, "{v}:i64"),
            Val::F32(v) => write!(f, "{v}:f32"),
            Val::F64(v) => write!(f, "{v}:f64"),
            Val::FuncRef(None) => f.write_str("null:funcref"),
            Val::FuncRef(Some(idx)) => write!(f, "func[{idx}]:funcref"),
        }
    }
}
