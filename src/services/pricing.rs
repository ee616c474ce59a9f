use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use uuid::Uuid;

use crate::entities::{cart_item, product};
use crate::errors::ServiceError;

/// Largest amount an order line or order total may reach. Matches the
/// fifteen integer digits of the stored `numeric(19, 4)` money columns.
pub const MAX_ORDER_AMOUNT: Decimal = dec!(999999999999999);

fn amount_out_of_range() -> ServiceError {
    ServiceError::ValidationError(format!(
        "Amount exceeds the supported maximum of {}",
        MAX_ORDER_AMOUNT
    ))
}

/// `unit_price * quantity`, refusing results above `MAX_ORDER_AMOUNT`.
pub fn line_amount(unit_price: Decimal, quantity: i32) -> Result<Decimal, ServiceError> {
    unit_price
        .checked_mul(Decimal::from(quantity))
        .filter(|amount| *amount <= MAX_ORDER_AMOUNT)
        .ok_or_else(amount_out_of_range)
}

/// `total + amount`, refusing results above `MAX_ORDER_AMOUNT`.
pub fn add_amount(total: Decimal, amount: Decimal) -> Result<Decimal, ServiceError> {
    total
        .checked_add(amount)
        .filter(|sum| *sum <= MAX_ORDER_AMOUNT)
        .ok_or_else(amount_out_of_range)
}

/// A cart line with its unit price frozen at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl PricedLine {
    pub fn line_total(&self) -> Result<Decimal, ServiceError> {
        line_amount(self.unit_price, self.quantity)
    }
}

/// Priced lines plus their total. `total` always equals the sum of
/// `quantity * unit_price` over `lines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceSnapshot {
    pub lines: Vec<PricedLine>,
    pub total: Decimal,
}

/// Computes unit prices from live catalog data. Holds no state besides the
/// rounding scale, so the same inputs always price the same way.
#[derive(Debug, Clone, Copy)]
pub struct PriceSnapshotResolver {
    rounding_scale: u32,
}

impl Default for PriceSnapshotResolver {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PriceSnapshotResolver {
    pub fn new(rounding_scale: u32) -> Self {
        Self { rounding_scale }
    }

    /// Prices every cart line at `now`.
    ///
    /// Each line must be paired with its product as read inside the caller's
    /// transaction; a missing or deactivated product fails the whole snapshot.
    pub fn resolve(
        &self,
        lines: &[(cart_item::Model, Option<product::Model>)],
        now: DateTime<Utc>,
    ) -> Result<PriceSnapshot, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let mut priced = Vec::with_capacity(lines.len());
        for (line, product) in lines {
            let product = match product {
                Some(p) if p.is_active => p,
                _ => return Err(ServiceError::ProductUnavailable(line.product_id)),
            };
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Cart line for product {} has non-positive quantity {}",
                    line.product_id, line.quantity
                )));
            }
            priced.push(PricedLine {
                product_id: product.id,
                product_name: product.name.clone(),
                quantity: line.quantity,
                unit_price: self.unit_price(product, now),
            });
        }

        let total = priced.iter().try_fold(Decimal::ZERO, |total, line| {
            add_amount(total, line.line_total()?)
        })?;
        Ok(PriceSnapshot {
            lines: priced,
            total,
        })
    }

    /// Base price, or the discounted price while the discount window is open.
    pub fn unit_price(&self, product: &product::Model, now: DateTime<Utc>) -> Decimal {
        if !discount_active(product, now) {
            return product.price;
        }
        let percent = product.discount_percent.clamp(0, 100);
        let remaining = Decimal::from(100 - percent) / Decimal::ONE_HUNDRED;
        (product.price * remaining)
            .round_dp_with_strategy(self.rounding_scale, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// A discount applies when its percent is positive and `now` falls inside the
/// window. A missing bound leaves that side open.
pub fn discount_active(product: &product::Model, now: DateTime<Utc>) -> bool {
    if product.discount_percent <= 0 {
        return false;
    }
    let started = product.discount_start.map_or(true, |start| start <= now);
    let not_ended = product.discount_end.map_or(true, |end| now <= end);
    started && not_ended
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn product(price: Decimal, discount_percent: i32) -> product::Model {
        let now = Utc::now();
        product::Model {
            id: Uuid::new_v4(),
            name: "Espresso Beans".to_string(),
            price,
            discount_percent,
            discount_start: None,
            discount_end: None,
            stock_quantity: 10,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn cart_line(product: &product::Model, quantity: i32) -> cart_item::Model {
        cart_item::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            product_id: product.id,
            quantity,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_cart_is_rejected() {
        let resolver = PriceSnapshotResolver::default();
        assert_matches!(
            resolver.resolve(&[], Utc::now()),
            Err(ServiceError::EmptyCart)
        );
    }

    #[test]
    fn totals_lines_at_base_price_without_discount() {
        let a = product(dec!(100), 0);
        let b = product(dec!(50), 0);
        let lines = vec![
            (cart_line(&a, 2), Some(a.clone())),
            (cart_line(&b, 1), Some(b.clone())),
        ];

        let snapshot = PriceSnapshotResolver::default()
            .resolve(&lines, Utc::now())
            .unwrap();

        assert_eq!(snapshot.total, dec!(250));
        assert_eq!(snapshot.lines[0].unit_price, dec!(100));
        assert_eq!(snapshot.lines[1].unit_price, dec!(50));
    }

    #[test]
    fn discount_applies_inside_window_only() {
        let now = Utc::now();
        let mut p = product(dec!(200), 25);
        p.discount_start = Some(now - Duration::days(1));
        p.discount_end = Some(now + Duration::days(1));

        let resolver = PriceSnapshotResolver::default();
        assert_eq!(resolver.unit_price(&p, now), dec!(150));
        assert_eq!(resolver.unit_price(&p, now + Duration::days(2)), dec!(200));
        assert_eq!(resolver.unit_price(&p, now - Duration::days(2)), dec!(200));
    }

    #[test]
    fn open_ended_window_is_always_active() {
        let p = product(dec!(80), 10);
        assert!(discount_active(&p, Utc::now()));
        assert_eq!(
            PriceSnapshotResolver::default().unit_price(&p, Utc::now()),
            dec!(72)
        );
    }

    #[test]
    fn rounding_is_half_away_from_zero_at_configured_scale() {
        // 99 * 0.85 = 84.15
        let p = product(dec!(99), 15);
        assert_eq!(
            PriceSnapshotResolver::new(0).unit_price(&p, Utc::now()),
            dec!(84)
        );
        assert_eq!(
            PriceSnapshotResolver::new(1).unit_price(&p, Utc::now()),
            dec!(84.2)
        );
        // 5 * 0.5 = 2.5
        let half = product(dec!(5), 50);
        assert_eq!(
            PriceSnapshotResolver::new(0).unit_price(&half, Utc::now()),
            dec!(3)
        );
    }

    #[test]
    fn inactive_or_missing_product_is_unavailable() {
        let mut p = product(dec!(10), 0);
        let line = cart_line(&p, 1);
        let resolver = PriceSnapshotResolver::default();

        assert_matches!(
            resolver.resolve(&[(line.clone(), None)], Utc::now()),
            Err(ServiceError::ProductUnavailable(id)) if id == p.id
        );

        p.is_active = false;
        assert_matches!(
            resolver.resolve(&[(line, Some(p))], Utc::now()),
            Err(ServiceError::ProductUnavailable(_))
        );
    }

    #[test]
    fn oversized_line_is_rejected_instead_of_overflowing() {
        let p = product(dec!(100000000000000000000000000), 0);
        let lines = vec![(cart_line(&p, 1000), Some(p.clone()))];

        assert_matches!(
            PriceSnapshotResolver::default().resolve(&lines, Utc::now()),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn total_above_the_money_column_range_is_rejected() {
        let a = product(dec!(600000000000000), 0);
        let b = product(dec!(600000000000000), 0);
        let lines = vec![
            (cart_line(&a, 1), Some(a.clone())),
            (cart_line(&b, 1), Some(b.clone())),
        ];

        assert_matches!(
            PriceSnapshotResolver::default().resolve(&lines, Utc::now()),
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(line_amount(dec!(600000000000000), 1).unwrap(), dec!(600000000000000));
        assert!(add_amount(MAX_ORDER_AMOUNT, dec!(0.0001)).is_err());
    }
}
