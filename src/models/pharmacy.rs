use serde::{Deserialize, Serialize};

use super::lenient;

/// One purchased line on a pharmacy receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PharmacyItem {
    #[serde(default, deserialize_with = "lenient::string")]
    pub item_name: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub strength: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub total_price: Option<f64>,
}

impl PharmacyItem {
    /// Line total as printed, or unit price times quantity.
    pub fn line_total(&self) -> Option<f64> {
        self.total_price
            .or_else(|| Some(self.unit_price? * self.quantity.unwrap_or(1.0)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PharmacyReceipt {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub pharmacy_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub purchase_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub receipt_number: Option<String>,
    #[serde(default)]
    pub items: Vec<PharmacyItem>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub total_amount: Option<f64>,
}
