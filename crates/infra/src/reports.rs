//! Read-only reporting over parts and the movement ledger.
//!
//! Reports never write. Aggregates over parts (`value_summary`,
//! `category_rollup`, `low_stock_items`) consider active parts only.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use sparestock_core::{ActorId, Money, MoneyTotal, PartId};
use sparestock_inventory::{histories_by_part, replay_quantity, Direction, LedgerTotals, Movement, Part};

use crate::config::StockConfig;
use crate::error::{StockError, StockResult};
use crate::store::{MovementFilter, MovementPage, Pagination, PartFilter, StockStore, TimeRange};

/// Inventory valuation over active parts.
///
/// Totals are summed in `i128` and cannot overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSummary {
    pub total_items: u64,
    pub total_quantity: i128,
    pub total_value: MoneyTotal,
    /// Mean unit price, rounded half-up to cents. Zero when there are no parts.
    pub average_unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total_quantity: i128,
    pub total_value: MoneyTotal,
}

/// Stock moved in and out on one UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMovement {
    pub date: NaiveDate,
    pub stock_in: i128,
    pub stock_out: i128,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_parts: u64,
    pub total_stock_in: i128,
    pub total_stock_out: i128,
    pub low_stock_items: u64,
}

/// A movement with the name and category of the part it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLine {
    #[serde(flatten)]
    pub movement: Movement,
    pub part_name: String,
    pub category: String,
}

/// One page of [`MovementLine`]s, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReport {
    pub lines: Vec<MovementLine>,
    /// Matching movements across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// A part whose cached fields disagree with its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDiscrepancy {
    pub part_id: PartId,
    pub cached_quantity: i64,
    /// `None` when the history cannot be replayed, e.g. because it drives
    /// stock below zero.
    pub ledger_quantity: Option<i64>,
    pub cached_total_value: Money,
    pub problems: Vec<String>,
}

/// Read side of the stock engine.
#[derive(Debug, Clone)]
pub struct ReportAggregator<S> {
    store: S,
    max_page_size: u32,
}

impl<S> ReportAggregator<S> {
    pub fn new(store: S, config: &StockConfig) -> Self {
        Self {
            store,
            max_page_size: config.max_page_size,
        }
    }
}

impl<S: StockStore> ReportAggregator<S> {
    /// Active parts at or below their minimum, lowest quantity first.
    pub async fn low_stock_items(&self) -> StockResult<Vec<Part>> {
        let mut parts: Vec<Part> = self
            .store
            .list_parts(&PartFilter::active())
            .await?
            .into_iter()
            .filter(Part::is_low_stock)
            .collect();
        parts.sort_by_key(|p| (p.quantity(), p.part_id()));
        Ok(parts)
    }

    /// Movements with `range.start <= occurred_at <= range.end`, newest first.
    ///
    /// `filter`'s own time bounds are replaced by `range`.
    #[instrument(skip(self), err)]
    pub async fn movements_in_range(
        &self,
        range: TimeRange,
        filter: MovementFilter,
        pagination: Pagination,
    ) -> StockResult<MovementReport> {
        ensure_ordered(&range)?;
        let page = self
            .store
            .query_movements(&filter.within(range), pagination.capped(self.max_page_size))
            .await?;
        debug!(total = page.total, returned = page.movements.len(), "movements queried");
        Ok(MovementReport {
            lines: self.with_part_details(page.movements).await?,
            total: page.total,
            pagination: page.pagination,
            has_more: page.has_more,
        })
    }

    pub async fn value_summary(&self) -> StockResult<ValueSummary> {
        let parts = self.store.list_parts(&PartFilter::active()).await?;

        let mut total_quantity = 0i128;
        let mut total_value = MoneyTotal::ZERO;
        let mut price_sum = MoneyTotal::ZERO;
        for part in &parts {
            total_quantity += i128::from(part.quantity());
            total_value = total_value.add(part.total_value());
            price_sum = price_sum.add(part.unit_price());
        }

        let total_items = parts.len() as u64;
        Ok(ValueSummary {
            total_items,
            total_quantity,
            total_value,
            average_unit_price: price_sum.average(total_items),
        })
    }

    /// Quantity and value per category, sorted by category name.
    pub async fn category_rollup(&self) -> StockResult<Vec<CategoryTotal>> {
        let parts = self.store.list_parts(&PartFilter::active()).await?;

        let mut by_category: BTreeMap<String, (i128, MoneyTotal)> = BTreeMap::new();
        for part in parts {
            let entry = by_category.entry(part.category().to_string()).or_default();
            entry.0 += i128::from(part.quantity());
            entry.1 = entry.1.add(part.total_value());
        }

        Ok(by_category
            .into_iter()
            .map(|(category, (total_quantity, total_value))| CategoryTotal {
                category,
                total_quantity,
                total_value,
            })
            .collect())
    }

    /// Per-day stock-in / stock-out totals, oldest day first. Days without
    /// movements are omitted.
    #[instrument(skip(self), err)]
    pub async fn daily_movements(&self, range: TimeRange) -> StockResult<Vec<DailyMovement>> {
        ensure_ordered(&range)?;
        let movements = self
            .store
            .scan_movements(&MovementFilter::default().within(range))
            .await?;

        let mut days: BTreeMap<NaiveDate, LedgerTotals> = BTreeMap::new();
        for m in &movements {
            days.entry(m.occurred_at.date_naive()).or_default().record(m);
        }
        Ok(days
            .into_iter()
            .map(|(date, totals)| DailyMovement {
                date,
                stock_in: totals.stock_in,
                stock_out: totals.stock_out,
            })
            .collect())
    }

    /// Every stock-out booked on `date` (UTC), newest first.
    pub async fn stock_outs_on(&self, date: NaiveDate) -> StockResult<Vec<MovementLine>> {
        let filter = MovementFilter::default()
            .within(TimeRange::day(date)?)
            .direction(Direction::Out);
        let mut movements = self.store.scan_movements(&filter).await?;
        sort_newest_first(&mut movements);
        self.with_part_details(movements).await
    }

    pub async fn dashboard_stats(&self) -> StockResult<DashboardStats> {
        let parts = self.store.list_parts(&PartFilter::active()).await?;
        let movements = self.store.scan_movements(&MovementFilter::default()).await?;

        let mut totals = LedgerTotals::default();
        for m in &movements {
            totals.record(m);
        }
        Ok(DashboardStats {
            total_parts: parts.len() as u64,
            total_stock_in: totals.stock_in,
            total_stock_out: totals.stock_out,
            low_stock_items: parts.iter().filter(|p| p.is_low_stock()).count() as u64,
        })
    }

    /// The `limit` most recent movements across all parts.
    pub async fn recent_movements(&self, limit: u32) -> StockResult<Vec<MovementLine>> {
        let page = self
            .store
            .query_movements(&MovementFilter::default(), self.first_page(limit))
            .await?;
        self.with_part_details(page.movements).await
    }

    /// The `limit` most recent movements booked by one actor.
    pub async fn actor_activity(&self, actor_id: ActorId, limit: u32) -> StockResult<Vec<MovementLine>> {
        let page = self
            .store
            .query_movements(&MovementFilter::for_actor(actor_id), self.first_page(limit))
            .await?;
        self.with_part_details(page.movements).await
    }

    /// Ledger of one part, newest first.
    pub async fn part_history(
        &self,
        part_id: PartId,
        pagination: Pagination,
    ) -> StockResult<MovementPage> {
        if self.store.load_part(part_id).await?.is_none() {
            return Err(StockError::NotFound(format!("part {part_id}")));
        }
        Ok(self
            .store
            .query_movements(&MovementFilter::for_part(part_id), pagination.capped(self.max_page_size))
            .await?)
    }

    /// Replay every part's ledger in id order and compare the result, and
    /// the part's own cached fields, with what is stored.
    ///
    /// A history that drives stock below zero is reported with no ledger
    /// quantity. Movements committed while this runs can show up as transient
    /// discrepancies; re-run before acting on a result.
    #[instrument(skip(self), err)]
    pub async fn reconcile(&self) -> StockResult<Vec<LedgerDiscrepancy>> {
        let mut movements = self.store.scan_movements(&MovementFilter::default()).await?;
        movements.sort_by_key(|m| m.id);
        let mut parts = self.store.list_parts(&PartFilter::default()).await?;
        parts.sort_by_key(Part::part_id);
        let histories = histories_by_part(&movements);

        let mut discrepancies = Vec::new();
        for part in parts {
            let history = histories.get(&part.part_id()).map_or(&[][..], Vec::as_slice);
            let mut problems = Vec::new();

            let ledger_quantity = match replay_quantity(history.iter().copied()) {
                Ok(quantity) => {
                    if quantity != part.quantity() {
                        problems.push(format!(
                            "cached quantity {} but ledger replays to {quantity}",
                            part.quantity()
                        ));
                    }
                    Some(quantity)
                }
                Err(err) => {
                    problems.push(err.to_string());
                    None
                }
            };
            if let Err(err) = part.check_invariants() {
                problems.push(err.to_string());
            }

            if !problems.is_empty() {
                warn!(
                    part_id = %part.part_id(),
                    cached_quantity = part.quantity(),
                    ?ledger_quantity,
                    ?problems,
                    "part out of step with ledger"
                );
                discrepancies.push(LedgerDiscrepancy {
                    part_id: part.part_id(),
                    cached_quantity: part.quantity(),
                    ledger_quantity,
                    cached_total_value: part.total_value(),
                    problems,
                });
            }
        }
        Ok(discrepancies)
    }

    fn first_page(&self, limit: u32) -> Pagination {
        Pagination::new(Some(limit), None).capped(self.max_page_size)
    }

    /// Attach part name and category to each movement.
    async fn with_part_details(&self, movements: Vec<Movement>) -> StockResult<Vec<MovementLine>> {
        let mut parts: BTreeMap<PartId, Part> = BTreeMap::new();
        for m in &movements {
            if parts.contains_key(&m.part_id) {
                continue;
            }
            let part = self.store.load_part(m.part_id).await?.ok_or_else(|| {
                StockError::StorageUnavailable(format!(
                    "movement {} refers to missing part {}",
                    m.id, m.part_id
                ))
            })?;
            parts.insert(m.part_id, part);
        }

        Ok(movements
            .into_iter()
            .filter_map(|movement| {
                let part = parts.get(&movement.part_id)?;
                Some(MovementLine {
                    part_name: part.name().to_string(),
                    category: part.category().to_string(),
                    movement,
                })
            })
            .collect())
    }
}

fn ensure_ordered(range: &TimeRange) -> StockResult<()> {
    if range.start > range.end {
        return Err(StockError::InvalidArgument(format!(
            "range start {} is after end {}",
            range.start, range.end
        )));
    }
    Ok(())
}

fn sort_newest_first(movements: &mut [Movement]) {
    movements.sort_by(|a, b| {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
