//! Order lifecycle service
//!
//! Order creation splits a request by owning shop, captures prices and
//! decrements stock under row locks. Status changes follow the state machine
//! in `shared::models::order`, and entering a restocking state puts the
//! items back exactly once.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{
    authorize_customer_request, authorize_status_change, can_view_order, check_transition,
    generate_order_numbers, merge_requested_items, split_by_shop, validate_idempotency_key,
    validate_phone, Actor, ApprovalType, GpsCoordinates, MovementType, Order, OrderItem,
    OrderStatus, OrderTotals, PricedLine, SubjectRef,
};
use sqlx::{PgConnection, PgExecutor, PgPool};
use validator::Validate;

use crate::config::OrderSettings;
use crate::error::{AppError, AppResult};
use crate::middleware::RequestMeta;
use crate::models::{convert_rows, OrderItemRow, OrderRow, ORDER_COLUMNS};
use crate::services::audit::{AuditEntry, AuditLogger};
use crate::services::finance::{self, NewApproval};
use crate::services::outbox::{self, DomainEvent};
use crate::services::stock_ledger::{self, StockChange};

const LIST_LIMIT: i64 = 200;

/// Order service
#[derive(Clone)]
pub struct OrderService {
    db: PgPool,
    settings: OrderSettings,
}

/// A requested line
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OrderItemInput {
    pub variant_id: i64,
    #[validate(range(min = 1, max = 10000, message = "Quantity must be between 1 and 10000"))]
    pub quantity: i32,
}

/// Input for placing an order from explicit items or the caller's cart
#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderInput {
    #[serde(default)]
    #[validate]
    pub items: Vec<OrderItemInput>,
    /// Check out the caller's cart instead of `items`
    #[serde(default)]
    pub from_cart: bool,
    #[validate(length(min = 1, max = 30, message = "Phone is required"))]
    pub phone: String,
    #[validate(length(min = 1, max = 1000, message = "Address is required"))]
    pub address: String,
    /// Restrict the order to one shop
    pub shop_id: Option<i64>,
    /// Customer record when staff place an order on someone's behalf
    pub customer_id: Option<i64>,
    pub coordinates: Option<GpsCoordinates>,
}

/// Input for the staff status endpoint
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStatusInput {
    pub status: OrderStatus,
    pub approval_request_id: Option<i64>,
    #[validate(length(max = 1000, message = "Cancel reason must be at most 1000 characters"))]
    pub cancel_reason: Option<String>,
}

/// Optional reason on customer requests
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CustomerRequestInput {
    #[validate(length(max = 1000, message = "Reason must be at most 1000 characters"))]
    pub reason: Option<String>,
}

/// An order together with its lines
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Result of a create-order call
#[derive(Debug, Clone, Serialize)]
pub struct OrderPlacement {
    pub orders: Vec<OrderWithItems>,
    /// True when an earlier call with the same idempotency key is replayed
    pub replayed: bool,
}

impl OrderService {
    /// Create a new OrderService instance
    pub fn new(db: PgPool, settings: OrderSettings) -> Self {
        Self { db, settings }
    }

    /// Place one order per owning shop of the requested items
    pub async fn create_order(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        input: CreateOrderInput,
        idempotency_key: Option<String>,
    ) -> AppResult<OrderPlacement> {
        input.validate()?;
        validate_phone(&input.phone)
            .map_err(|m| AppError::validation("phone", m, "เบอร์โทรศัพท์ไม่ถูกต้อง"))?;
        if let Some(coordinates) = &input.coordinates {
            if !coordinates.is_valid() {
                return Err(AppError::validation(
                    "coordinates",
                    "Coordinates are out of range",
                    "พิกัดไม่ถูกต้อง",
                ));
            }
        }
        if !input.from_cart && input.items.is_empty() {
            return Err(AppError::validation(
                "items",
                "At least one item is required",
                "ต้องมีสินค้าอย่างน้อยหนึ่งรายการ",
            ));
        }
        if let Some(key) = &idempotency_key {
            validate_idempotency_key(key, self.settings.max_key_len())
                .map_err(|m| AppError::IdempotencyConflict(m.to_string()))?;

            let existing = self.find_by_key(actor.user_id, key).await?;
            if !existing.is_empty() {
                tracing::info!(user_id = actor.user_id, key = %key, "Replaying order creation");
                return Ok(OrderPlacement {
                    orders: existing,
                    replayed: true,
                });
            }
        }

        let mut tx = self.db.begin().await?;

        if let Some(key) = &idempotency_key {
            let claimed = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO order_idempotency_keys (user_id, idempotency_key)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                RETURNING user_id
                "#,
            )
            .bind(actor.user_id)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

            if !claimed {
                // A concurrent call with the same key committed first
                tx.rollback().await?;
                let existing = self.find_by_key(actor.user_id, key).await?;
                if existing.is_empty() {
                    return Err(AppError::IdempotencyConflict(
                        "key was already used for a request that created no order".to_string(),
                    ));
                }
                tracing::info!(user_id = actor.user_id, key = %key, "Replaying order creation");
                return Ok(OrderPlacement {
                    orders: existing,
                    replayed: true,
                });
            }
        }

        let requested: Vec<(i64, i32)> = if input.from_cart {
            sqlx::query_as::<_, (i64, i32)>(
                r#"
                SELECT c.variant_id, c.quantity
                FROM cart_items c
                JOIN product_variants v ON v.id = c.variant_id
                JOIN products p ON p.id = v.product_id
                WHERE c.user_id = $1 AND ($2::BIGINT IS NULL OR p.shop_id = $2)
                ORDER BY c.variant_id
                FOR UPDATE OF c
                "#,
            )
            .bind(actor.user_id)
            .bind(input.shop_id)
            .fetch_all(&mut *tx)
            .await?
        } else {
            input.items.iter().map(|i| (i.variant_id, i.quantity)).collect()
        };
        if requested.is_empty() {
            return Err(AppError::validation("items", "Cart is empty", "ตะกร้าสินค้าว่างเปล่า"));
        }

        let merged = merge_requested_items(&requested).ok_or_else(quantity_overflow)?;
        let variant_ids: Vec<i64> = merged.iter().map(|(id, _)| *id).collect();
        let locked = stock_ledger::lock_variants(&mut *tx, &variant_ids).await?;
        let by_id: HashMap<i64, _> = locked.iter().map(|v| (v.id, v)).collect();

        let mut lines = Vec::with_capacity(merged.len());
        for (variant_id, quantity) in &merged {
            let variant = by_id
                .get(variant_id)
                .ok_or_else(|| AppError::NotFound(format!("Product variant {}", variant_id)))?;
            if !variant.is_active {
                return Err(AppError::Validation {
                    field: "items".to_string(),
                    message: format!("Variant {} is not available", variant_id),
                    message_th: format!("สินค้า {} ไม่พร้อมจำหน่าย", variant_id),
                });
            }
            if input.shop_id.map_or(false, |shop_id| shop_id != variant.shop_id) {
                return Err(AppError::Validation {
                    field: "items".to_string(),
                    message: format!("Variant {} belongs to another shop", variant_id),
                    message_th: format!("สินค้า {} เป็นของร้านค้าอื่น", variant_id),
                });
            }
            if variant.stock_level < *quantity {
                return Err(AppError::InsufficientStock(format!(
                    "variant {} has {} in stock, {} requested",
                    variant_id, variant.stock_level, quantity
                )));
            }
            lines.push(PricedLine {
                variant_id: *variant_id,
                product_id: variant.product_id,
                shop_id: variant.shop_id,
                quantity: *quantity,
                unit_price: variant.price,
            });
        }

        let placed = NewOrder {
            user_id: actor.user_id,
            customer_id: if actor.is_staff() { input.customer_id } else { None },
            phone: &input.phone,
            address: &input.address,
            coordinates: input.coordinates.as_ref(),
            idempotency_key: idempotency_key.as_deref(),
            date: Utc::now().date_naive(),
        };

        let mut orders = Vec::new();
        for (shop_id, shop_lines) in split_by_shop(lines) {
            orders.push(insert_order(&mut *tx, actor, meta, &placed, shop_id, &shop_lines).await?);
        }

        if input.from_cart {
            sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND variant_id = ANY($2)")
                .bind(actor.user_id)
                .bind(&variant_ids)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            user_id = actor.user_id,
            orders = orders.len(),
            "Orders created: {}",
            orders
                .iter()
                .map(|o| o.order.invoice_no.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(OrderPlacement {
            orders,
            replayed: false,
        })
    }

    async fn find_by_key(&self, user_id: i64, key: &str) -> AppResult<Vec<OrderWithItems>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE user_id = $1 AND idempotency_key = $2 ORDER BY shop_id",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(key)
        .fetch_all(&self.db)
        .await?;

        let orders: Vec<Order> = convert_rows(rows)?;
        let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
        let mut items = load_items(&self.db, &ids).await?;

        Ok(orders
            .into_iter()
            .map(|order| OrderWithItems {
                items: items.remove(&order.id).unwrap_or_default(),
                order,
            })
            .collect())
    }

    /// Staff status change
    pub async fn update_status(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        order_id: i64,
        input: UpdateStatusInput,
    ) -> AppResult<OrderWithItems> {
        input.validate()?;

        let mut tx = self.db.begin().await?;
        let order = lock_order(&mut *tx, order_id).await?;

        let approval = match input.approval_request_id {
            Some(id) => Some(finance::load_approval(&mut *tx, id).await.map_err(|e| match e {
                AppError::NotFound(_) => {
                    AppError::ApprovalRequired(format!("approval request {} does not exist", id))
                }
                other => other,
            })?),
            None => None,
        };

        check_transition(
            order.status,
            input.status,
            order.delivered_at,
            Utc::now(),
            self.settings.return_window_days,
        )?;
        authorize_status_change(actor, order.id, order.shop_id, input.status, approval.as_ref())?;

        let updated = apply_transition(
            &mut *tx,
            actor,
            meta,
            &order,
            input.status,
            input.cancel_reason.as_deref(),
            input.approval_request_id,
        )
        .await?;
        let items = load_items(&mut *tx, &[order.id]).await?.remove(&order.id).unwrap_or_default();

        tx.commit().await?;

        Ok(OrderWithItems { order: updated, items })
    }

    /// Owner-initiated cancel, refund request or return request
    pub async fn customer_request(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        order_id: i64,
        next: OrderStatus,
        input: CustomerRequestInput,
    ) -> AppResult<OrderWithItems> {
        input.validate()?;

        let mut tx = self.db.begin().await?;
        let order = lock_order(&mut *tx, order_id).await?;

        if order.user_id != actor.user_id {
            return Err(AppError::InsufficientPermissions);
        }
        check_transition(
            order.status,
            next,
            order.delivered_at,
            Utc::now(),
            self.settings.return_window_days,
        )?;
        authorize_customer_request(actor, order.user_id, order.status, next)?;

        let mut approval_request_id = None;
        if next == OrderStatus::RefundRequested {
            let reason = input
                .reason
                .clone()
                .unwrap_or_else(|| "Customer refund request".to_string());
            let request = finance::insert_approval(
                &mut *tx,
                actor,
                meta,
                NewApproval {
                    order_id: order.id,
                    request_type: ApprovalType::Refund,
                    amount: Some(order.total_amount).filter(|a| a.is_sign_positive() && !a.is_zero()),
                    reason: &reason,
                },
            )
            .await?;
            approval_request_id = Some(request.id);
        }

        let cancel_reason = match next {
            OrderStatus::Cancelled => input.reason.as_deref(),
            _ => None,
        };
        let updated =
            apply_transition(&mut *tx, actor, meta, &order, next, cancel_reason, approval_request_id)
                .await?;
        let items = load_items(&mut *tx, &[order.id]).await?.remove(&order.id).unwrap_or_default();

        tx.commit().await?;

        Ok(OrderWithItems { order: updated, items })
    }

    /// One order with its items, if the actor may see it
    pub async fn get_order(&self, actor: &Actor, order_id: i64) -> AppResult<OrderWithItems> {
        let order = fetch_order(&self.db, order_id).await?;
        if !can_view_order(actor, order.user_id, order.shop_id) {
            return Err(AppError::InsufficientPermissions);
        }
        let items = load_items(&self.db, &[order.id]).await?.remove(&order.id).unwrap_or_default();
        Ok(OrderWithItems { order, items })
    }

    /// Orders visible to the actor, newest first
    pub async fn list_orders(&self, actor: &Actor) -> AppResult<Vec<Order>> {
        let staff_shop = if actor.is_staff() { actor.shop_id } else { None };

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {}
            FROM orders
            WHERE $1 OR shop_id = $2 OR user_id = $3
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
            ORDER_COLUMNS
        ))
        .bind(actor.is_elevated() || actor.is_finance_capable())
        .bind(staff_shop)
        .bind(actor.user_id)
        .bind(LIST_LIMIT)
        .fetch_all(&self.db)
        .await?;

        Ok(convert_rows(rows)?)
    }
}

/// Fields shared by every sibling order of one checkout
struct NewOrder<'a> {
    user_id: i64,
    customer_id: Option<i64>,
    phone: &'a str,
    address: &'a str,
    coordinates: Option<&'a GpsCoordinates>,
    idempotency_key: Option<&'a str>,
    date: NaiveDate,
}

async fn insert_order(
    conn: &mut PgConnection,
    actor: &Actor,
    meta: &RequestMeta,
    placed: &NewOrder<'_>,
    shop_id: i64,
    lines: &[PricedLine],
) -> AppResult<OrderWithItems> {
    let sequence = sqlx::query_scalar::<_, i64>("SELECT nextval('order_number_seq')")
        .fetch_one(&mut *conn)
        .await?;
    let numbers = generate_order_numbers(placed.date, sequence);
    let totals = OrderTotals::from_lines(lines);

    let row = sqlx::query_as::<_, OrderRow>(&format!(
        r#"
        INSERT INTO orders (
            shop_id, user_id, customer_id, invoice_no, receipt_no, job_no, status,
            subtotal, discount_total, total_amount, phone, address, latitude, longitude,
            idempotency_key
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING {}
        "#,
        ORDER_COLUMNS
    ))
    .bind(shop_id)
    .bind(placed.user_id)
    .bind(placed.customer_id)
    .bind(&numbers.invoice_no)
    .bind(&numbers.receipt_no)
    .bind(&numbers.job_no)
    .bind(OrderStatus::Pending.as_str())
    .bind(totals.subtotal)
    .bind(totals.discount_total)
    .bind(totals.total_amount)
    .bind(placed.phone)
    .bind(placed.address)
    .bind(placed.coordinates.map(|c| c.latitude))
    .bind(placed.coordinates.map(|c| c.longitude))
    .bind(placed.idempotency_key)
    .fetch_one(&mut *conn)
    .await?;
    let order = Order::try_from(row)?;

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = sqlx::query_as::<_, OrderItemRow>(
            r#"
            INSERT INTO order_items (order_id, product_id, variant_id, quantity, unit_price, line_total)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, order_id, product_id, variant_id, quantity, unit_price, line_total
            "#,
        )
        .bind(order.id)
        .bind(line.product_id)
        .bind(line.variant_id)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.line_total())
        .fetch_one(&mut *conn)
        .await?;
        items.push(OrderItem::from(item));

        stock_ledger::adjust_stock(
            conn,
            actor,
            line.variant_id,
            -line.quantity,
            &StockChange::new(MovementType::OrderPlaced, SubjectRef::Order(order.id)),
        )
        .await?;
    }

    AuditLogger::log(
        conn,
        actor,
        meta,
        AuditEntry::new("order.created", SubjectRef::Order(order.id)).new_values(json!({
            "status": order.status,
            "invoice_no": order.invoice_no,
            "shop_id": order.shop_id,
            "total_amount": order.total_amount,
            "items": items.len(),
        })),
    )
    .await?;

    outbox::enqueue(
        conn,
        DomainEvent::new(
            "order.created",
            SubjectRef::Order(order.id),
            json!({
                "shop_id": order.shop_id,
                "user_id": order.user_id,
                "invoice_no": order.invoice_no,
                "total_amount": order.total_amount,
            }),
        ),
    )
    .await?;

    Ok(OrderWithItems { order, items })
}

async fn fetch_order(db: &PgPool, order_id: i64) -> AppResult<Order> {
    let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
        .bind(order_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Order".to_string()))?;
    Ok(Order::try_from(row)?)
}

/// Load an order under `FOR UPDATE`
pub(crate) async fn lock_order(conn: &mut PgConnection, order_id: i64) -> AppResult<Order> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
        ORDER_COLUMNS
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Order".to_string()))?;
    Ok(Order::try_from(row)?)
}

/// Load a shared view of an order for ledger writes that must not race a
/// status change
pub(crate) async fn share_order(conn: &mut PgConnection, order_id: i64) -> AppResult<Order> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {} FROM orders WHERE id = $1 FOR SHARE",
        ORDER_COLUMNS
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Order".to_string()))?;
    Ok(Order::try_from(row)?)
}

async fn load_items<'e, E>(executor: E, order_ids: &[i64]) -> AppResult<HashMap<i64, Vec<OrderItem>>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, OrderItemRow>(
        r#"
        SELECT id, order_id, product_id, variant_id, quantity, unit_price, line_total
        FROM order_items
        WHERE order_id = ANY($1)
        ORDER BY order_id, id
        "#,
    )
    .bind(order_ids)
    .fetch_all(executor)
    .await?;

    let mut grouped: HashMap<i64, Vec<OrderItem>> = HashMap::new();
    for row in rows {
        grouped.entry(row.order_id).or_default().push(row.into());
    }
    Ok(grouped)
}

/// Write a validated status change: stamp the timestamp column, restock if
/// entering a restocking state, audit and enqueue the event
async fn apply_transition(
    conn: &mut PgConnection,
    actor: &Actor,
    meta: &RequestMeta,
    order: &Order,
    next: OrderStatus,
    cancel_reason: Option<&str>,
    approval_request_id: Option<i64>,
) -> AppResult<Order> {
    let stamp = next
        .timestamp()
        .map(|t| format!(", {} = NOW()", t.column()))
        .unwrap_or_default();

    let row = sqlx::query_as::<_, OrderRow>(&format!(
        r#"
        UPDATE orders
        SET status = $2, cancel_reason = COALESCE($3, cancel_reason), updated_at = NOW(){}
        WHERE id = $1
        RETURNING {}
        "#,
        stamp, ORDER_COLUMNS
    ))
    .bind(order.id)
    .bind(next.as_str())
    .bind(cancel_reason)
    .fetch_one(&mut *conn)
    .await?;
    let updated = Order::try_from(row)?;

    let restocked = order.status.triggers_restock(next);
    if restocked {
        restock(conn, actor, order.id).await?;
    }

    AuditLogger::log(
        conn,
        actor,
        meta,
        AuditEntry::new("order.status_changed", SubjectRef::Order(order.id))
            .old_values(json!({ "status": order.status }))
            .new_values(json!({ "status": next }))
            .metadata(json!({
                "approval_request_id": approval_request_id,
                "cancel_reason": cancel_reason,
                "restocked": restocked,
            })),
    )
    .await?;

    outbox::enqueue(
        conn,
        DomainEvent::new(
            "order.status_changed",
            SubjectRef::Order(order.id),
            json!({
                "shop_id": order.shop_id,
                "user_id": order.user_id,
                "from": order.status,
                "to": next,
            }),
        ),
    )
    .await?;

    tracing::info!(
        order_id = order.id,
        from = %order.status,
        to = %next,
        restocked,
        "Order status changed by user {}",
        actor.user_id
    );

    Ok(updated)
}

fn quantity_overflow() -> AppError {
    AppError::validation(
        "items",
        "Total quantity of a variant is too large",
        "จำนวนรวมของสินค้าเกินขีดจำกัด",
    )
}

/// Put every item of an order back into stock
async fn restock(conn: &mut PgConnection, actor: &Actor, order_id: i64) -> AppResult<()> {
    let items = sqlx::query_as::<_, (i64, i32)>(
        "SELECT variant_id, quantity FROM order_items WHERE order_id = $1",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    let merged = merge_requested_items(&items).ok_or_else(quantity_overflow)?;
    let ids: Vec<i64> = merged.iter().map(|(id, _)| *id).collect();
    stock_ledger::lock_variants(conn, &ids).await?;

    let change = StockChange::new(MovementType::OrderRestock, SubjectRef::Order(order_id));
    for (variant_id, quantity) in merged {
        stock_ledger::adjust_stock(conn, actor, variant_id, quantity, &change).await?;
    }

    Ok(())
}
