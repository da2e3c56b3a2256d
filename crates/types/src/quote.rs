use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result of converting a source amount at a captured rate, with the bridge
/// fee and slippage tolerance applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub rate: Decimal,
    pub fee: Decimal,
    pub fee_percent: Decimal,
    /// Minimum acceptable receipt after slippage.
    pub min_received: Decimal,
}

/// Conversion math captured at order creation.
///
/// `fee = amount * fee_percent / 100`, the fee is taken on the source side,
/// and `min_received` applies the slippage tolerance (a percentage) to the
/// destination amount.
pub fn calculate_conversion(
    amount: Decimal,
    rate: Decimal,
    fee_percent: Decimal,
    slippage: Decimal,
) -> Quote {
    let hundred = Decimal::new(100, 0);
    let fee = amount * fee_percent / hundred;
    let net_amount = amount - fee;
    let to_amount = net_amount * rate;
    let min_received = to_amount * (Decimal::ONE - slippage / hundred);

    Quote {
        from_amount: amount,
        to_amount,
        rate,
        fee,
        fee_percent,
        min_received,
    }
}
