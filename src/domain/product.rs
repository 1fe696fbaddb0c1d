//! Product record emitted to the sink.
//!
//! The record is a flat document keyed by ASIN. Everything except the ASIN
//! is best-effort: extraction leaves missing fields empty and the serializer
//! drops them from the emitted document.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single best-seller rank, e.g. `#3 in Office Laminating Supplies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestSellerRank {
    /// Category name, e.g. "Baby", "Baby Bottle Brushes".
    pub category: String,
    pub rank: i64,
}

/// A product-detail page reduced to a flat, indexable document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub asin: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub about_item: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub brand: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub manufacturer: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub age_range: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub weight: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub material: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub color: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub origin: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub dimensions: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sustainability_features: Vec<String>,
    #[serde(skip_serializing_if = "is_zero_f32", default)]
    pub average_rating: f32,
    #[serde(skip_serializing_if = "is_zero_i64", default)]
    pub ratings: i64,
    pub is_amazon_choice: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub bought_together_asins: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub best_sellers: Vec<BestSellerRank>,
    #[serde(skip_serializing_if = "is_zero_f32", default)]
    pub list_price: f32,
    #[serde(skip_serializing_if = "is_zero_f32", default)]
    pub discounted_price: f32,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub currency: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub seller_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first_available_at: Option<NaiveDate>,
    #[serde(skip_serializing_if = "is_zero_i64", default)]
    pub bought_past_month: i64,
}

fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_dropped_from_the_document() {
        let product = Product {
            asin: "B0D6PQDNQS".to_string(),
            title: "Wooden blocks".to_string(),
            ..Default::default()
        };

        let doc = serde_json::to_value(&product).unwrap();
        assert_eq!(doc["asin"], "B0D6PQDNQS");
        assert_eq!(doc["title"], "Wooden blocks");
        assert!(doc.get("description").is_none());
        assert!(doc.get("bestSellers").is_none());
        assert!(doc.get("firstAvailableAt").is_none());
        // booleans are always present
        assert_eq!(doc["isAmazonChoice"], false);
    }

    #[test]
    fn field_names_are_camel_case() {
        let product = Product {
            asin: "B0D6PQDNQS".to_string(),
            bought_past_month: 400,
            first_available_at: NaiveDate::from_ymd_opt(2023, 5, 17),
            ..Default::default()
        };

        let doc = serde_json::to_value(&product).unwrap();
        assert_eq!(doc["boughtPastMonth"], 400);
        assert_eq!(doc["firstAvailableAt"], "2023-05-17");
    }
}
