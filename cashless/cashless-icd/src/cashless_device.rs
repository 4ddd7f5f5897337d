use postcard_schema::Schema;
use serde::{Deserialize, Serialize};

//These are the signals raised by the cashless bus towards the payment peripheral.
//Only the first five matter to the vend flow, the rest are accepted and ignored.

#[derive(Serialize, Deserialize, Schema, Debug, PartialEq, Eq, Clone)]
pub enum CashlessSignal {
    InitialComplete { cashless_info: Vec<u8>, vmc_info: Vec<u8> },
    VendRequest(Vec<u8>),
    VendCancel,
    VendSuccess(Vec<u8>),
    VendFailure(Vec<u8>),
    Reset,
    SetupMaxMinPrices(Vec<u8>),
    SessionComplete,
    CashSale(Vec<u8>),
    NegativeVendRequest(Vec<u8>),
    SelectionDenied(Vec<u8>),
    CouponReply(Vec<u8>),
    ReaderDisable,
    ReaderEnable,
    ReaderCancel,
    ReaderDataEntryResponse(Vec<u8>),
    RevalueRequest(Vec<u8>),
    RevalueLimitRequest,
    SyncTimeDate(Vec<u8>),
    Diagnostics(Vec<u8>),
}

impl CashlessSignal {
    pub fn name(&self) -> &'static str {
        match self {
            CashlessSignal::InitialComplete { .. } => "initial_complete",
            CashlessSignal::VendRequest(_) => "vend_request",
            CashlessSignal::VendCancel => "vend_cancel",
            CashlessSignal::VendSuccess(_) => "vend_success",
            CashlessSignal::VendFailure(_) => "vend_failure",
            CashlessSignal::Reset => "reset",
            CashlessSignal::SetupMaxMinPrices(_) => "setup_max_min_prices",
            CashlessSignal::SessionComplete => "session_complete",
            CashlessSignal::CashSale(_) => "cash_sale",
            CashlessSignal::NegativeVendRequest(_) => "negative_vend_request",
            CashlessSignal::SelectionDenied(_) => "selection_denied",
            CashlessSignal::CouponReply(_) => "coupon_reply",
            CashlessSignal::ReaderDisable => "reader_disable",
            CashlessSignal::ReaderEnable => "reader_enable",
            CashlessSignal::ReaderCancel => "reader_cancel",
            CashlessSignal::ReaderDataEntryResponse(_) => "reader_data_entry_response",
            CashlessSignal::RevalueRequest(_) => "revalue_request",
            CashlessSignal::RevalueLimitRequest => "revalue_limit_request",
            CashlessSignal::SyncTimeDate(_) => "sync_time_date",
            CashlessSignal::Diagnostics(_) => "diagnostics",
        }
    }

    /// True for signals that never change service state
    pub fn is_protocol_noop(&self) -> bool {
        !matches!(
            self,
            CashlessSignal::InitialComplete { .. }
                | CashlessSignal::VendRequest(_)
                | CashlessSignal::VendCancel
                | CashlessSignal::VendSuccess(_)
                | CashlessSignal::VendFailure(_)
        )
    }

    /// Signals whose loss would leave a vend without an outcome
    pub fn is_vend_related(&self) -> bool {
        matches!(
            self,
            CashlessSignal::VendRequest(_)
                | CashlessSignal::VendCancel
                | CashlessSignal::VendSuccess(_)
                | CashlessSignal::VendFailure(_)
        )
    }
}

/// Reader setup pushed to the cashless bus before the monitor is registered.
#[derive(Serialize, Deserialize, Schema, Debug, PartialEq, Eq, Copy, Clone)]
pub struct CashlessConfig {
    pub feature_level: u8,
    pub currency_code: u16, //ISO 4217 numeric, 840 = USD
    pub scale_factor: u8,
    pub decimal_places: u8,
    pub max_response_time_secs: u8,
    pub misc_options: u8,
    pub driver_log_level: u8,
}

impl Default for CashlessConfig {
    fn default() -> Self {
        Self {
            feature_level: 3,
            currency_code: 840,
            scale_factor: 100,
            decimal_places: 2,
            max_response_time_secs: 30,
            misc_options: 0,
            driver_log_level: 3,
        }
    }
}
