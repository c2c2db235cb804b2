//! Read-side query vocabulary: time ranges, filters, pagination.
//!
//! All movement queries are paginated by default.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use sparestock_core::{ActorId, DomainError, PartId};
use sparestock_inventory::{Direction, Movement, Part, PartStatus};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Pagination parameters for movement queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of movements to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    /// Apply a configured page-size cap.
    pub fn capped(self, max: u32) -> Self {
        Self {
            limit: self.limit.min(max),
            offset: self.offset,
        }
    }
}

/// Inclusive `[start, end]` window over `occurred_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DomainError> {
        if start > end {
            return Err(DomainError::invalid_argument(format!(
                "range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// One whole UTC calendar day, from midnight to its last nanosecond.
    pub fn day(date: NaiveDate) -> Result<Self, DomainError> {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = date
            .and_hms_nano_opt(23, 59, 59, 999_999_999)
            .ok_or_else(|| DomainError::invalid_argument(format!("no end of day for {date}")))?
            .and_utc();
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Filter criteria for movement queries. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub part_id: Option<PartId>,
    pub actor_id: Option<ActorId>,
    pub direction: Option<Direction>,
    pub occurred_after: Option<DateTime<Utc>>,
    pub occurred_before: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn for_part(part_id: PartId) -> Self {
        Self {
            part_id: Some(part_id),
            ..Default::default()
        }
    }

    pub fn for_actor(actor_id: ActorId) -> Self {
        Self {
            actor_id: Some(actor_id),
            ..Default::default()
        }
    }

    pub fn within(mut self, range: TimeRange) -> Self {
        self.occurred_after = Some(range.start);
        self.occurred_before = Some(range.end);
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn matches(&self, m: &Movement) -> bool {
        self.part_id.is_none_or(|p| m.part_id == p)
            && self.actor_id.is_none_or(|a| m.actor_id == a)
            && self.direction.is_none_or(|d| m.direction == d)
            && self.occurred_after.is_none_or(|t| m.occurred_at >= t)
            && self.occurred_before.is_none_or(|t| m.occurred_at <= t)
    }
}

/// Paginated movement query result, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPage {
    pub movements: Vec<Movement>,
    /// Total number of movements matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl MovementPage {
    pub fn new(movements: Vec<Movement>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > u64::from(pagination.offset) + u64::from(pagination.limit);
        Self {
            movements,
            total,
            pagination,
            has_more,
        }
    }
}

/// Filter for part listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartFilter {
    pub status: Option<PartStatus>,
    pub category: Option<String>,
}

impl PartFilter {
    pub fn active() -> Self {
        Self {
            status: Some(PartStatus::Active),
            category: None,
        }
    }

    pub fn matches(&self, part: &Part) -> bool {
        self.status.is_none_or(|s| part.status() == s)
            && self.category.as_deref().is_none_or(|c| part.category() == c)
    }
}
