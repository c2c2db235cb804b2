use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use sparestock_core::{AggregateRoot, DomainError, ExpectedVersion, MovementId, PartId};
use sparestock_inventory::{Movement, NewMovement, NewPart, Part};

use super::query::{MovementFilter, MovementPage, Pagination, PartFilter};
use super::r#trait::{StockStore, StoreError};

/// One part row. `None` marks a deleted part so in-flight writers that still
/// hold the row cannot resurrect it.
type PartRow = Arc<Mutex<Option<Part>>>;

/// In-memory stock store.
///
/// Intended for tests/dev. Each part row has its own lock, so writers on
/// different parts only meet at the ledger append.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    parts: RwLock<BTreeMap<PartId, PartRow>>,
    ledger: RwLock<Vec<Movement>>,
    last_part_id: AtomicI64,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, part_id: PartId) -> Result<PartRow, StoreError> {
        let parts = self.parts.read().map_err(|_| poisoned("parts"))?;
        parts
            .get(&part_id)
            .cloned()
            .ok_or(StoreError::PartNotFound(part_id))
    }

    fn check_version(current: &Part, expected: ExpectedVersion) -> Result<(), StoreError> {
        if !expected.matches(current.version()) {
            return Err(StoreError::Concurrency(format!(
                "part {}: expected {expected:?}, found {}",
                current.part_id(),
                current.version()
            )));
        }
        Ok(())
    }
}

fn poisoned(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{what} lock poisoned"))
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn insert_part(&self, draft: NewPart) -> Result<Part, StoreError> {
        let id = PartId::new(self.last_part_id.fetch_add(1, Ordering::SeqCst) + 1);
        let part = Part::register(id, draft, Utc::now())?;

        let mut parts = self.parts.write().map_err(|_| poisoned("parts"))?;
        parts.insert(id, Arc::new(Mutex::new(Some(part.clone()))));
        Ok(part)
    }

    async fn load_part(&self, part_id: PartId) -> Result<Option<Part>, StoreError> {
        let row = match self.row(part_id) {
            Ok(row) => row,
            Err(StoreError::PartNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let guard = row.lock().map_err(|_| poisoned("part"))?;
        Ok(guard.clone())
    }

    async fn save_part(
        &self,
        part: &Part,
        expected_version: ExpectedVersion,
    ) -> Result<Part, StoreError> {
        let row = self.row(part.part_id())?;
        let mut guard = row.lock().map_err(|_| poisoned("part"))?;
        let current = guard.as_ref().ok_or(StoreError::PartNotFound(part.part_id()))?;

        Self::check_version(current, expected_version)?;
        if part.quantity() != current.quantity() {
            return Err(DomainError::invariant("quantity only changes through commit_movement").into());
        }

        let mut saved = part.clone();
        saved.touch(Utc::now());
        *guard = Some(saved.clone());
        Ok(saved)
    }

    async fn commit_movement(
        &self,
        part: &Part,
        expected_version: ExpectedVersion,
        movement: NewMovement,
    ) -> Result<(Part, Movement), StoreError> {
        if movement.part_id != part.part_id() {
            return Err(DomainError::invariant("movement does not belong to part").into());
        }
        if part.quantity() < 0 {
            return Err(DomainError::invariant("quantity cannot go negative").into());
        }

        let row = self.row(part.part_id())?;
        let mut guard = row.lock().map_err(|_| poisoned("part"))?;
        let current = guard.as_ref().ok_or(StoreError::PartNotFound(part.part_id()))?;
        Self::check_version(current, expected_version)?;

        let now = Utc::now();
        let mut ledger = self.ledger.write().map_err(|_| poisoned("ledger"))?;
        let id = MovementId::new(ledger.len() as i64 + 1);
        let committed = Movement::commit(id, movement, now);

        let mut updated = part.clone();
        updated.touch(now);

        // Both writes land while the ledger lock is held.
        ledger.push(committed.clone());
        *guard = Some(updated.clone());

        Ok((updated, committed))
    }

    async fn delete_part(&self, part_id: PartId) -> Result<(), StoreError> {
        let mut parts = self.parts.write().map_err(|_| poisoned("parts"))?;
        let row = parts
            .get(&part_id)
            .cloned()
            .ok_or(StoreError::PartNotFound(part_id))?;
        let mut guard = row.lock().map_err(|_| poisoned("part"))?;
        if guard.is_none() {
            return Err(StoreError::PartNotFound(part_id));
        }

        let ledger = self.ledger.read().map_err(|_| poisoned("ledger"))?;
        let references = ledger.iter().filter(|m| m.part_id == part_id).count();
        if references > 0 {
            return Err(StoreError::Restricted(format!(
                "part {part_id} is referenced by {references} movement(s)"
            )));
        }

        *guard = None;
        parts.remove(&part_id);
        Ok(())
    }

    async fn list_parts(&self, filter: &PartFilter) -> Result<Vec<Part>, StoreError> {
        let rows: Vec<PartRow> = {
            let parts = self.parts.read().map_err(|_| poisoned("parts"))?;
            parts.values().cloned().collect()
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let guard = row.lock().map_err(|_| poisoned("part"))?;
            if let Some(part) = guard.as_ref().filter(|p| filter.matches(p)) {
                out.push(part.clone());
            }
        }
        Ok(out)
    }

    async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let ledger = self.ledger.read().map_err(|_| poisoned("ledger"))?;

        let mut matching: Vec<&Movement> = ledger.iter().filter(|m| filter.matches(m)).collect();
        matching.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matching.len() as u64;
        let movements = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();

        Ok(MovementPage::new(movements, total, pagination))
    }

    async fn scan_movements(&self, filter: &MovementFilter) -> Result<Vec<Movement>, StoreError> {
        let ledger = self.ledger.read().map_err(|_| poisoned("ledger"))?;
        Ok(ledger.iter().filter(|m| filter.matches(m)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone};
    use sparestock_core::{ActorId, Aggregate, Money};
    use sparestock_inventory::{ApplyMovement, Direction};

    fn draft(name: &str) -> NewPart {
        NewPart::new(name, "filters", Money::from_cents(500).unwrap())
    }

    async fn stock_in(store: &InMemoryStockStore, part: &Part, quantity: i64) -> (Part, Movement) {
        stock_in_at(store, part, quantity, None).await
    }

    async fn stock_in_at(
        store: &InMemoryStockStore,
        part: &Part,
        quantity: i64,
        at: Option<DateTime<Utc>>,
    ) -> (Part, Movement) {
        let mut cmd = ApplyMovement::stock_in(part.part_id(), quantity, ActorId::new(1));
        cmd.occurred_at = at;
        let movement = part.handle(&cmd).unwrap();
        let mut next = part.clone();
        next.apply(&movement).unwrap();
        store
            .commit_movement(&next, ExpectedVersion::Exact(part.version()), movement)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn assigns_monotonic_ids() {
        let store = InMemoryStockStore::new();
        let a = store.insert_part(draft("A")).await.unwrap();
        let b = store.insert_part(draft("B")).await.unwrap();
        assert!(b.part_id() > a.part_id());

        let (a, m1) = stock_in(&store, &a, 1).await;
        let (_, m2) = stock_in(&store, &a, 1).await;
        assert!(m2.id > m1.id);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_and_nothing_is_written() {
        let store = InMemoryStockStore::new();
        let part = store.insert_part(draft("A")).await.unwrap();
        let (_, _) = stock_in(&store, &part, 5).await;

        // `part` is now one version behind the stored row.
        let cmd = ApplyMovement::stock_in(part.part_id(), 3, ActorId::new(1));
        let movement = part.handle(&cmd).unwrap();
        let mut next = part.clone();
        next.apply(&movement).unwrap();
        let err = store
            .commit_movement(&next, ExpectedVersion::Exact(part.version()), movement)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        let stored = store.load_part(part.part_id()).await.unwrap().unwrap();
        assert_eq!(stored.quantity(), 5);
        let ledger = store.scan_movements(&MovementFilter::default()).await.unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn save_part_cannot_change_quantity() {
        let store = InMemoryStockStore::new();
        let part = store.insert_part(draft("A")).await.unwrap();
        let (stocked, _) = stock_in(&store, &part, 5).await;

        // A copy from before the stock-in, forced through with `Any`.
        let err = store.save_part(&part, ExpectedVersion::Any).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::InvariantViolation(_))));

        let mut repriced = stocked.clone();
        repriced.reprice(Money::from_cents(100).unwrap()).unwrap();
        let saved = store
            .save_part(&repriced, ExpectedVersion::Exact(stocked.version()))
            .await
            .unwrap();
        assert_eq!(saved.total_value().cents(), 500);
    }

    #[tokio::test]
    async fn delete_is_restricted_while_movements_reference_the_part() {
        let store = InMemoryStockStore::new();
        let used = store.insert_part(draft("used")).await.unwrap();
        let unused = store.insert_part(draft("unused")).await.unwrap();
        stock_in(&store, &used, 2).await;

        let err = store.delete_part(used.part_id()).await.unwrap_err();
        assert!(matches!(err, StoreError::Restricted(_)));
        assert!(store.load_part(used.part_id()).await.unwrap().is_some());

        store.delete_part(unused.part_id()).await.unwrap();
        assert!(store.load_part(unused.part_id()).await.unwrap().is_none());
        assert!(matches!(
            store.delete_part(unused.part_id()).await,
            Err(StoreError::PartNotFound(_))
        ));
    }

    #[tokio::test]
    async fn query_orders_newest_first_and_paginates() {
        let store = InMemoryStockStore::new();
        let part = store.insert_part(draft("A")).await.unwrap();
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        // Inserted out of chronological order on purpose.
        let mut current = part;
        for hours in [2, 0, 1] {
            let (next, _) =
                stock_in_at(&store, &current, 1, Some(base + Duration::hours(hours))).await;
            current = next;
        }

        let page = store
            .query_movements(&MovementFilter::default(), Pagination { limit: 2, offset: 0 })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert!(page.has_more);
        let times: Vec<_> = page.movements.iter().map(|m| m.occurred_at).collect();
        assert_eq!(times, vec![base + Duration::hours(2), base + Duration::hours(1)]);

        let scan = store.scan_movements(&MovementFilter::default()).await.unwrap();
        let ids: Vec<i64> = scan.iter().map(|m| m.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(scan.iter().all(|m| m.direction == Direction::In));
    }
}
