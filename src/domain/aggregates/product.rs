//! Product Aggregate

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ReturnItem;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub count_in_stock: i64,
    #[serde(default)]
    pub variants: Vec<ColorVariant>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorVariant { pub color: String, pub sizes: Vec<SizeStock> }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeStock { pub size: String, pub count_in_stock: i64 }

impl Product {
    /// Label an order line carries for one color/size of this product.
    pub fn variant_label(&self, color: &str, size: &str) -> String { format!("{} - {} - {}", self.name, color, size) }

    /// Puts returned units back on the shelf.
    ///
    /// Aggregate stock always grows; the size-level stock only when the line's variant
    /// label can be rebuilt from this product. Returns whether a size matched.
    pub fn restore_stock(&mut self, item: &ReturnItem) -> bool {
        let qty = i64::from(item.quantity);
        self.count_in_stock += qty;
        let label = item.variant.trim();
        let found = self.variants.iter().enumerate().find_map(|(v, variant)| {
            variant.sizes.iter().position(|size| self.variant_label(&variant.color, &size.size) == label).map(|s| (v, s))
        });
        match found {
            Some((v, s)) => {
                self.variants[v].sizes[s].count_in_stock += qty;
                true
            }
            None => false,
        }
    }
}
