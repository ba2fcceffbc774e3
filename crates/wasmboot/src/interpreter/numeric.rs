use super::Trap;
use crate::parse::numeric::NumOp;
use crate::stack::Stack;

/// `fmin` with wasm semantics: NaN propagates and -0 < +0.
macro_rules! wasm_min {
    ($t:ty, $a:expr, $b:expr) => {{
        let (a, b): ($t, $t) = ($a, $b);
        if a.is_nan() || b.is_nan() {
            <$t>::NAN
        } else if a == b {
            if a.is_sign_negative() { a } else { b }
        } else {
            a.min(b)
        }
    }};
}

/// `fmax` with wasm semantics: NaN propagates and +0 > -0.
macro_rules! wasm_max {
    ($t:ty, $a:expr, $b:expr) => {{
        let (a, b): ($t, $t) = ($a, $b);
        if a.is_nan() || b.is_nan() {
            <$t>::NAN
        } else if a == b {
            if a.is_sign_positive() { a } else { b }
        } else {
            a.max(b)
        }
    }};
}

/// Execute a numeric instruction against the operand stack.
pub(super) fn eval(op: NumOp, stack: &mut Stack) -> Result<(), Trap> {
    use NumOp::*;

    macro_rules! un {
        ($pop:ident => $push:ident, |$a:ident| $e:expr) => {{
            let $a = stack.$pop();
            let r = $e;
            stack.$push(r);
        }};
    }
    macro_rules! bin {
        ($pop:ident => $push:ident, |$a:ident, $b:ident| $e:expr) => {{
            let $b = stack.$pop();
            let $a = stack.$pop();
            let r = $e;
            stack.$push(r);
        }};
    }

    match op {
        // --- i32 ---
        I32Eqz => un!(pop_i32 => push_i32, |a| (a == 0) as i32),
        I32Eq => bin!(pop_i32 => push_i32, |a, b| (a == b) as i32),
        I32Ne => bin!(pop_i32 => push_i32, |a, b| (a != b) as i32),
        I32LtS => bin!(pop_i32 => push_i32, |a, b| (a < b) as i32),
        I32LtU => bin!(pop_i32 => push_i32, |a, b| ((a as u32) < (b as u32)) as i32),
        I32GtS => bin!(pop_i32 => push_i32, |a, b| (a > b) as i32),
        I32GtU => bin!(pop_i32 => push_i32, |a, b| ((a as u32) > (b as u32)) as i32),
        I32LeS => bin!(pop_i32 => push_i32, |a, b| (a <= b) as i32),
        I32LeU => bin!(pop_i32 => push_i32, |a, b| ((a as u32) <= (b as u32)) as i32),
        I32GeS => bin!(pop_i32 => push_i32, |a, b| (a >= b) as i32),
        I32GeU => bin!(pop_i32 => push_i32, |a, b| ((a as u32) >= (b as u32)) as i32),
        I32Clz => un!(pop_i32 => push_i32, |a| a.leading_zeros() as i32),
        I32Ctz => un!(pop_i32 => push_i32, |a| a.trailing_zeros() as i32),
        I32Popcnt => un!(pop_i32 => push_i32, |a| a.count_ones() as i32),
        I32Add => bin!(pop_i32 => push_i32, |a, b| a.wrapping_add(b)),
        I32Sub => bin!(pop_i32 => push_i32, |a, b| a.wrapping_sub(b)),
        I32Mul => bin!(pop_i32 => push_i32, |a, b| a.wrapping_mul(b)),
        I32DivS => bin!(pop_i32 => push_i32, |a, b| {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            a.checked_div(b).ok_or(Trap::IntegerOverflow)?
        }),
        I32DivU => bin!(pop_i32 => push_i32, |a, b| {
            (a as u32).checked_div(b as u32).ok_or(Trap::IntegerDivideByZero)? as i32
        }),
        I32RemS => bin!(pop_i32 => push_i32, |a, b| {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            a.wrapping_rem(b)
        }),
        I32RemU => bin!(pop_i32 => push_i32, |a, b| {
            (a as u32).checked_rem(b as u32).ok_or(Trap::IntegerDivideByZero)? as i32
        }),
        I32And => bin!(pop_i32 => push_i32, |a, b| a & b),
        I32Or => bin!(pop_i32 => push_i32, |a, b| a | b),
        I32Xor => bin!(pop_i32 => push_i32, |a, b| a ^ b),
        I32Shl => bin!(pop_i32 => push_i32, |a, b| a.wrapping_shl(b as u32)),
        I32ShrS => bin!(pop_i32 => push_i32, |a, b| a.wrapping_shr(b as u32)),
        I32ShrU => bin!(pop_i32 => push_i32, |a, b| (a as u32).wrapping_shr(b as u32) as i32),
        I32Rotl => bin!(pop_i32 => push_i32, |a, b| a.rotate_left(b as u32)),
        I32Rotr => bin!(pop_i32 => push_i32, |a, b| a.rotate_right(b as u32)),

        // --- i64 ---
        I64Eqz => un!(pop_i64 => push_i32, |a| (a == 0) as i32),
        I64Eq => bin!(pop_i64 => push_i32, |a, b| (a == b) as i32),
        I64Ne => bin!(pop_i64 => push_i32, |a, b| (a != b) as i32),
        I64LtS => bin!(pop_i64 => push_i32, |a, b| (a < b) as i32),
        I64LtU => bin!(pop_i64 => push_i32, |a, b| ((a as u64) < (b as u64)) as i32),
        I64GtS => bin!(pop_i64 => push_i32, |a, b| (a > b) as i32),
        I64GtU => bin!(pop_i64 => push_i32, |a, b| ((a as u64) > (b as u64)) as i32),
        I64LeS => bin!(pop_i64 => push_i32, |a, b| (a <= b) as i32),
        I64LeU => bin!(pop_i64 => push_i32, |a, b| ((a as u64) <= (b as u64)) as i32),
        I64GeS => bin!(pop_i64 => push_i32, |a, b| (a >= b) as i32),
        I64GeU => bin!(pop_i64 => push_i32, |a, b| ((a as u64) >= (b as u64)) as i32),
        I64Clz => un!(pop_i64 => push_i64, |a| a.leading_zeros() as i64),
        I64Ctz => un!(pop_i64 => push_i64, |a| a.trailing_zeros() as i64),
        I64Popcnt => un!(pop_i64 => push_i64, |a| a.count_ones() as i64),
        I64Add => bin!(pop_i64 => push_i64, |a, b| a.wrapping_add(b)),
        I64Sub => bin!(pop_i64 => push_i64, |a, b| a.wrapping_sub(b)),
        I64Mul => bin!(pop_i64 => push_i64, |a, b| a.wrapping_mul(b)),
        I64DivS => bin!(pop_i64 => push_i64, |a, b| {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            a.checked_div(b).ok_or(Trap::IntegerOverflow)?
        }),
        I64DivU => bin!(pop_i64 => push_i64, |a, b| {
            (a as u64).checked_div(b as u64).ok_or(Trap::IntegerDivideByZero)? as i64
        }),
        I64RemS => bin!(pop_i64 => push_i64, |a, b| {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            a.wrapping_rem(b)
        }),
        I64RemU => bin!(pop_i64 => push_i64, |a, b| {
            (a as u64).checked_rem(b as u64).ok_or(Trap::IntegerDivideByZero)? as i64
        }),
        I64And => bin!(pop_i64 => push_i64, |a, b| a & b),
        I64Or => bin!(pop_i64 => push_i64, |a, b| a | b),
        I64Xor => bin!(pop_i64 => push_i64, |a, b| a ^ b),
        I64Shl => bin!(pop_i64 => push_i64, |a, b| a.wrapping_shl(b as u32)),
        I64ShrS => bin!(pop_i64 => push_i64, |a, b| a.wrapping_shr(b as u32)),
        I64ShrU => bin!(pop_i64 => push_i64, |a, b| (a as u64).wrapping_shr(b as u32) as i64),
        I64Rotl => bin!(pop_i64 => push_i64, |a, b| a.rotate_left(b as u32)),
        I64Rotr => bin!(pop_i64 => push_i64, |a, b| a.rotate_right(b as u32)),

        // --- f32 ---
        F32Eq => bin!(pop_f32 => push_i32, |a, b| (a == b) as i32),
        F32Ne => bin!(pop_f32 => push_i32, |a, b| (a != b) as i32),
        F32Lt => bin!(pop_f32 => push_i32, |a, b| (a < b) as i32),
        F32Gt => bin!(pop_f32 => push_i32, |a, b| (a > b) as i32),
        F32Le => bin!(pop_f32 => push_i32, |a, b| (a <= b) as i32),
        F32Ge => bin!(pop_f32 => push_i32, |a, b| (a >= b) as i32),
        F32Abs => un!(pop_f32 => push_f32, |a| a.abs()),
        F32Neg => un!(pop_f32 => push_f32, |a| -a),
        F32Ceil => un!(pop_f32 => push_f32, |a| a.ceil()),
        F32Floor => un!(pop_f32 => push_f32, |a| a.floor()),
        F32Trunc => un!(pop_f32 => push_f32, |a| a.trunc()),
        F32Nearest => un!(pop_f32 => push_f32, |a| a.round_ties_even()),
        F32Sqrt => un!(pop_f32 => push_f32, |a| a.sqrt()),
        F32Add => bin!(pop_f32 => push_f32, |a, b| a + b),
        F32Sub => bin!(pop_f32 => push_f32, |a, b| a - b),
        F32Mul => bin!(pop_f32 => push_f32, |a, b| a * b),
        F32Div => bin!(pop_f32 => push_f32, |a, b| a / b),
        F32Min => bin!(pop_f32 => push_f32, |a, b| wasm_min!(f32, a, b)),
        F32Max => bin!(pop_f32 => push_f32, |a, b| wasm_max!(f32, a, b)),
        F32Copysign => bin!(pop_f32 => push_f32, |a, b| a.copysign(b)),

        // --- f64 ---
        F64Eq => bin!(pop_f64 => push_i32, |a, b| (a == b) as i32),
        F64Ne => bin!(pop_f64 => push_i32, |a, b| (a != b) as i32),
        F64Lt => bin!(pop_f64 => push_i32, |a, b| (a < b) as i32),
        F64Gt => bin!(pop_f64 => push_i32, |a, b| (a > b) as i32),
        F64Le => bin!(pop_f64 => push_i32, |a, b| (a <= b) as i32),
        F64Ge => bin!(pop_f64 => push_i32, |a, b| (a >= b) as i32),
        F64Abs => un!(pop_f64 => push_f64, |a| a.abs()),
        F64Neg => un!(pop_f64 => push_f64, |a| -a),
        F64Ceil => un!(pop_f64 => push_f64, |a| a.ceil()),
        F64Floor => un!(pop_f64 => push_f64, |a| a.floor()),
        F64Trunc => un!(pop_f64 => push_f64, |a| a.trunc()),
        F64Nearest => un!(pop_f64 => push_f64, |a| a.round_ties_even()),
        F64Sqrt => un!(pop_f64 => push_f64, |a| a.sqrt()),
        F64Add => bin!(pop_f64 => push_f64, |a, b| a + b),
        F64Sub => bin!(pop_f64 => push_f64, |a, b| a - b),
        F64Mul => bin!(pop_f64 => push_f64, |a, b| a * b),
        F64Div => bin!(pop_f64 => push_f64, |a, b| a / b),
        F64Min => bin!(pop_f64 => push_f64, |a, b| wasm_min!(f64, a, b)),
        F64Max => bin!(pop_f64 => push_f64, |a, b| wasm_max!(f64, a, b)),
        F64Copysign => bin!(pop_f64 => push_f64, |a, b| a.copysign(b)),

        // --- conversions ---
        I32WrapI64 => un!(pop_i64 => push_i32, |a| a as i32),
        I32TruncF32S => un!(pop_f32 => push_i32, |a| trunc_i32(a as f64)?),
        I32TruncF32U => un!(pop_f32 => push_i32, |a| trunc_u32(a as f64)? as i32),
        I32TruncF64S => un!(pop_f64 => push_i32, |a| trunc_i32(a)?),
        I32TruncF64U => un!(pop_f64 => push_i32, |a| trunc_u32(a)? as i32),
        I64ExtendI32S => un!(pop_i32 => push_i64, |a| a as i64),
        I64ExtendI32U => un!(pop_i32 => push_i64, |a| a as u32 as i64),
        I64TruncF32S => un!(pop_f32 => push_i64, |a| trunc_i64(a as f64)?),
        I64TruncF32U => un!(pop_f32 => push_i64, |a| trunc_u64(a as f64)? as i64),
        I64TruncF64S => un!(pop_f64 => push_i64, |a| trunc_i64(a)?),
        I64TruncF64U => un!(pop_f64 => push_i64, |a| trunc_u64(a)? as i64),
        F32ConvertI32S => un!(pop_i32 => push_f32, |a| a as f32),
        F32ConvertI32U => un!(pop_i32 => push_f32, |a| a as u32 as f32),
        F32ConvertI64S => un!(pop_i64 => push_f32, |a| a as f32),
        F32ConvertI64U => un!(pop_i64 => push_f32, |a| a as u64 as f32),
        F32DemoteF64 => un!(pop_f64 => push_f32, |a| a as f32),
        F64ConvertI32S => un!(pop_i32 => push_f64, |a| a as f64),
        F64ConvertI32U => un!(pop_i32 => push_f64, |a| a as u32 as f64),
        F64ConvertI64S => un!(pop_i64 => push_f64, |a| a as f64),
        F64ConvertI64U => un!(pop_i64 => push_f64, |a| a as u64 as f64),
        F64PromoteF32 => un!(pop_f32 => push_f64, |a| a as f64),
        // Slots already hold the raw bits of either interpretation.
        I32ReinterpretF32 | I64ReinterpretF64 | F32ReinterpretI32 | F64ReinterpretI64 => {}

        // --- sign extension ---
        I32Extend8S => un!(pop_i32 => push_i32, |a| a as i8 as i32),
        I32Extend16S => un!(pop_i32 => push_i32, |a| a as i16 as i32),
        I64Extend8S => un!(pop_i64 => push_i64, |a| a as i8 as i64),
        I64Extend16S => un!(pop_i64 => push_i64, |a| a as i16 as i64),
        I64Extend32S => un!(pop_i64 => push_i64, |a| a as i32 as i64),

        // --- saturating truncation: Rust float-to-int casts saturate and map NaN to 0 ---
        I32TruncSatF32S => un!(pop_f32 => push_i32, |a| a as i32),
        I32TruncSatF32U => un!(pop_f32 => push_i32, |a| a as u32 as i32),
        I32TruncSatF64S => un!(pop_f64 => push_i32, |a| a as i32),
        I32TruncSatF64U => un!(pop_f64 => push_i32, |a| a as u32 as i32),
        I64TruncSatF32S => un!(pop_f32 => push_i64, |a| a as i64),
        I64TruncSatF32U => un!(pop_f32 => push_i64, |a| a as u64 as i64),
        I64TruncSatF64S => un!(pop_f64 => push_i64, |a| a as i64),
        I64TruncSatF64U => un!(pop_f64 => push_i64, |a| a as u64 as i64),
    }
    Ok(())
}

fn checked_trunc(x: f64, min: f64, max_exclusive: f64) -> Result<f64, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t < min || t >= max_exclusive {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t)
}

fn trunc_i32(x: f64) -> Result<i32, Trap> {
    Ok(checked_trunc(x, -2_147_483_648.0, 2_147_483_648.0)? as i32)
}

fn trunc_u32(x: f64) -> Result<u32, Trap> {
    Ok(checked_trunc(x, 0.0, 4_294_967_296.0)? as u32)
}

fn trunc_i64(x: f64) -> Result<i64, Trap> {
    Ok(checked_trunc(x, -9_223_372_036_854_775_808.0, 9_223_372_036_854_775_808.0)? as i64)
}

fn trunc_u64(x: f64) -> Result<u64, Trap> {
    Ok(checked_trunc(x, 0.0, 18_446_744_073_709_551_616.0)? as u64)
}
