use crate::models::transaction::sats_to_btc;

/// Script family of the funding address, as far as fee sizing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressScriptType {
    Legacy,
    SegwitV0,
}

impl AddressScriptType {
    // Only mainnet P2WPKH is told apart; testnet, P2SH and P2TR size as legacy.
    pub fn from_address(address: &str) -> Self {
        if address.starts_with("bc1q") {
            AddressScriptType::SegwitV0
        } else {
            AddressScriptType::Legacy
        }
    }

    fn overhead_vbytes(self) -> f64 {
        match self {
            AddressScriptType::Legacy => 10.0,
            AddressScriptType::SegwitV0 => 10.5,
        }
    }

    fn input_vbytes(self) -> f64 {
        match self {
            AddressScriptType::Legacy => 148.0,
            AddressScriptType::SegwitV0 => 68.0,
        }
    }

    fn output_vbytes(self) -> f64 {
        match self {
            AddressScriptType::Legacy => 34.0,
            AddressScriptType::SegwitV0 => 31.0,
        }
    }
}

pub fn estimate_vsize(num_inputs: usize, num_outputs: usize, script_type: AddressScriptType) -> f64 {
    script_type.overhead_vbytes()
        + num_inputs as f64 * script_type.input_vbytes()
        + num_outputs as f64 * script_type.output_vbytes()
}

/// Absolute fee in BTC for a transaction of the given shape.
pub fn estimate_fee(
    num_inputs: usize,
    num_outputs: usize,
    sat_per_vb: f64,
    script_type: AddressScriptType,
) -> f64 {
    let vsize = estimate_vsize(num_inputs, num_outputs, script_type).ceil();
    let fee_sats = (vsize * sat_per_vb).ceil();
    sats_to_btc(fee_sats)
}
