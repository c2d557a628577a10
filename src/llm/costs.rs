//! Static per-model pricing, USD per token.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) price per token. Unknown models are priced like the
/// default mid-tier model so cost tracking never reads zero.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let m = model.to_ascii_lowercase();
    if m.starts_with("gpt-4o-mini") {
        (dec!(0.00000015), dec!(0.0000006))
    } else if m.starts_with("gpt-4o") {
        (dec!(0.0000025), dec!(0.00001))
    } else if m.starts_with("gpt-4.1-mini") {
        (dec!(0.0000004), dec!(0.0000016))
    } else if m.starts_with("gpt-4.1") {
        (dec!(0.000002), dec!(0.000008))
    } else if m.contains("haiku") {
        (dec!(0.0000008), dec!(0.000004))
    } else if m.contains("opus") {
        (dec!(0.000015), dec!(0.000075))
    } else if m.contains("sonnet") {
        (dec!(0.000003), dec!(0.000015))
    } else {
        (dec!(0.0000025), dec!(0.00001))
    }
}
