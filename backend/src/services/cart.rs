//! Shopping cart of the calling user

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{split_by_shop, Actor, OrderTotals, PricedLine};
use sqlx::{FromRow, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Cart service
#[derive(Clone)]
pub struct CartService {
    db: PgPool,
}

/// Set the quantity of one variant; zero removes the line
#[derive(Debug, Deserialize, Validate)]
pub struct SetCartItemInput {
    pub variant_id: i64,
    #[validate(range(min = 0, max = 10000, message = "Quantity must be between 0 and 10000"))]
    pub quantity: i32,
}

/// A cart line priced at the current variant price
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CartLine {
    pub variant_id: i64,
    pub product_id: i64,
    pub shop_id: i64,
    pub sku: String,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub in_stock: i32,
}

/// Cart lines grouped the way checkout will split them
#[derive(Debug, Clone, Serialize)]
pub struct ShopCart {
    pub shop_id: i64,
    pub totals: OrderTotals,
    pub lines: Vec<CartLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub shops: Vec<ShopCart>,
    pub subtotal: Decimal,
}

impl CartService {
    /// Create a new CartService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Upsert one line and return the whole cart
    pub async fn set_item(&self, actor: &Actor, input: SetCartItemInput) -> AppResult<CartView> {
        input.validate()?;

        if input.quantity == 0 {
            sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND variant_id = $2")
                .bind(actor.user_id)
                .bind(input.variant_id)
                .execute(&self.db)
                .await?;
            return self.view(actor).await;
        }

        let active = sqlx::query_scalar::<_, bool>("SELECT is_active FROM product_variants WHERE id = $1")
            .bind(input.variant_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Product variant".to_string()))?;
        if !active {
            return Err(AppError::validation(
                "variant_id",
                "Variant is not available",
                "สินค้าไม่พร้อมจำหน่าย",
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO cart_items (user_id, variant_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, variant_id)
            DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = NOW()
            "#,
        )
        .bind(actor.user_id)
        .bind(input.variant_id)
        .bind(input.quantity)
        .execute(&self.db)
        .await?;

        self.view(actor).await
    }

    /// The caller's cart grouped by shop
    pub async fn view(&self, actor: &Actor) -> AppResult<CartView> {
        let lines = sqlx::query_as::<_, CartLine>(
            r#"
            SELECT c.variant_id, v.product_id, p.shop_id, v.sku, p.name AS product_name,
                   c.quantity, v.price AS unit_price, v.stock_level AS in_stock
            FROM cart_items c
            JOIN product_variants v ON v.id = c.variant_id
            JOIN products p ON p.id = v.product_id
            WHERE c.user_id = $1
            ORDER BY p.shop_id, c.variant_id
            "#,
        )
        .bind(actor.user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(group_cart(lines))
    }
}

fn group_cart(lines: Vec<CartLine>) -> CartView {
    let priced: Vec<PricedLine> = lines
        .iter()
        .map(|l| PricedLine {
            variant_id: l.variant_id,
            product_id: l.product_id,
            shop_id: l.shop_id,
            quantity: l.quantity,
            unit_price: l.unit_price,
        })
        .collect();

    let mut shops = Vec::new();
    let mut subtotal = Decimal::ZERO;
    for (shop_id, shop_lines) in split_by_shop(priced) {
        let totals = OrderTotals::from_lines(&shop_lines);
        subtotal += totals.subtotal;
        shops.push(ShopCart {
            shop_id,
            totals,
            lines: lines.iter().filter(|l| l.shop_id == shop_id).cloned().collect(),
        });
    }

    CartView { shops, subtotal }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(variant_id: i64, shop_id: i64, quantity: i32, price: i64) -> CartLine {
        CartLine {
            variant_id,
            product_id: variant_id * 10,
            shop_id,
            sku: format!("SKU-{}", variant_id),
            product_name: "Shirt".into(),
            quantity,
            unit_price: Decimal::from(price),
            in_stock: 100,
        }
    }

    #[test]
    fn test_cart_groups_by_shop() {
        let view = group_cart(vec![line(1, 1, 2, 100), line(2, 2, 1, 50), line(3, 1, 1, 25)]);
        assert_eq!(view.shops.len(), 2);
        assert_eq!(view.shops[0].shop_id, 1);
        assert_eq!(view.shops[0].totals.subtotal, Decimal::from(225));
        assert_eq!(view.shops[0].lines.len(), 2);
        assert_eq!(view.shops[1].totals.subtotal, Decimal::from(50));
        assert_eq!(view.subtotal, Decimal::from(275));
    }
}
