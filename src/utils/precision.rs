// src/utils/precision.rs
use rust_decimal::Decimal;

// Decimal держит максимум 28 знаков после запятой; лотность бирж сюда укладывается с запасом.
const MAX_PRECISION: u32 = 18;

/// Округляет количество ВНИЗ до `precision` знаков после запятой.
/// Пример: amount=10.999, precision=2 -> 10.99
pub fn quantize_amount(amount: Decimal, precision: u32) -> Decimal {
    let factor = Decimal::from(10u64.pow(precision.min(MAX_PRECISION)));
    // (amount * factor).floor() / factor
    (amount * factor).floor() / factor
}
