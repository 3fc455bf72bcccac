//! Read-only listing of classes with filtering, sorting and pagination.
//!
//! [`ListingQuery::apply`] is the reference semantics: adapters that push the
//! query down to a database must return the same page the pure function
//! would return for the same set of records.

use std::cmp::Ordering;

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::class::ClassRecord;
use crate::types::{ClassKind, Timestamp};

/// One-based page index.
#[nutype(
    validate(greater_or_equal = 1),
    default = 1,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct PageNumber(u32);

/// Number of classes per page, between 1 and 1000.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1000),
    default = 100,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct PageSize(u32);

/// Field a listing is ordered by. Order is always ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Earliest classes first.
    #[default]
    StartTime,
    /// Alphabetical by class name.
    Name,
    /// Smallest classes first.
    Capacity,
    /// Grouped by kind, alphabetical by its lowercase name.
    Kind,
}

/// Filter, order and page selection for a listing request.
///
/// Every field has a default, so an empty JSON object deserializes to the
/// first page of 100 classes ordered by start time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingQuery {
    kind: Option<ClassKind>,
    starts_at_or_after: Option<Timestamp>,
    page: PageNumber,
    page_size: PageSize,
    sort: SortField,
}

impl ListingQuery {
    /// First page, default page size, ordered by start time, no filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only classes of this kind.
    #[must_use]
    pub const fn kind(mut self, kind: ClassKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Only classes starting at or after `instant`.
    #[must_use]
    pub const fn starting_from(mut self, instant: Timestamp) -> Self {
        self.starts_at_or_after = Some(instant);
        self
    }

    /// Selects the page to return.
    #[must_use]
    pub const fn page(mut self, page: PageNumber) -> Self {
        self.page = page;
        self
    }

    /// Sets the number of classes per page.
    #[must_use]
    pub const fn page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the ordering.
    #[must_use]
    pub const fn sort_by(mut self, sort: SortField) -> Self {
        self.sort = sort;
        self
    }

    /// The kind filter, if any.
    pub const fn kind_filter(&self) -> Option<ClassKind> {
        self.kind
    }

    /// The earliest start time filter, if any.
    pub const fn starts_at_or_after(&self) -> Option<Timestamp> {
        self.starts_at_or_after
    }

    /// The requested page.
    pub const fn page_number(&self) -> PageNumber {
        self.page
    }

    /// The requested page size.
    pub const fn size(&self) -> PageSize {
        self.page_size
    }

    /// The requested ordering.
    pub const fn sort(&self) -> SortField {
        self.sort
    }

    /// Number of matching classes that precede the requested page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.into_inner() - 1) * u64::from(self.page_size.into_inner())
    }

    /// Whether `class` passes the filters.
    pub fn matches(&self, class: &ClassRecord) -> bool {
        self.kind.map_or(true, |kind| class.kind() == kind)
            && self
                .starts_at_or_after
                .map_or(true, |earliest| class.start_time() >= earliest)
    }

    /// Listing order: the sort field ascending, ties broken by class id.
    pub fn compare(&self, a: &ClassRecord, b: &ClassRecord) -> Ordering {
        let primary = match self.sort {
            SortField::StartTime => a.start_time().cmp(&b.start_time()),
            SortField::Name => a.name().cmp(b.name()),
            SortField::Capacity => a.capacity().cmp(&b.capacity()),
            SortField::Kind => a.kind().as_str().cmp(b.kind().as_str()),
        };
        primary.then_with(|| a.id().cmp(b.id()))
    }

    /// Filters, orders and paginates `classes`.
    pub fn apply<I>(&self, classes: I) -> ClassPage
    where
        I: IntoIterator<Item = ClassRecord>,
    {
        let mut matching: Vec<ClassRecord> =
            classes.into_iter().filter(|class| self.matches(class)).collect();
        matching.sort_by(|a, b| self.compare(a, b));

        let total = matching.len() as u64;
        let skip = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let take = usize::try_from(self.page_size.into_inner()).unwrap_or(usize::MAX);
        let classes = matching.into_iter().skip(skip).take(take).collect();

        ClassPage::new(classes, total, self)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPage {
    /// Classes on this page, in listing order.
    pub classes: Vec<ClassRecord>,
    /// Number of classes matching the filters across all pages.
    pub total: u64,
    /// The page this is.
    pub page: PageNumber,
    /// The page size the listing was computed with.
    pub page_size: PageSize,
    /// Number of pages needed to show every matching class.
    pub total_pages: u64,
}

impl ClassPage {
    /// Assembles a page from an already ordered and sliced set of classes.
    pub fn new(classes: Vec<ClassRecord>, total: u64, query: &ListingQuery) -> Self {
        Self {
            classes,
            total,
            page: query.page,
            page_size: query.page_size,
            total_pages: total.div_ceil(u64::from(query.page_size.into_inner())),
        }
    }

    /// Whether a later page exists.
    pub fn has_next(&self) -> bool {
        u64::from(self.page.into_inner()) < self.total_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capacity, ClassId, ClassName};
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn base_time() -> Timestamp {
        Timestamp::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap())
    }

    fn class(id: &str, name: &str, kind: ClassKind, capacity: u32, hours: i64) -> ClassRecord {
        ClassRecord::new(
            ClassId::try_new(id).unwrap(),
            ClassName::try_new(name).unwrap(),
            kind,
            Capacity::try_new(capacity).unwrap(),
            Timestamp::new(base_time().into_datetime() + Duration::hours(hours)),
        )
    }

    fn catalog() -> Vec<ClassRecord> {
        vec![
            class("c-1", "Morning Flow", ClassKind::Yoga, 10, 3),
            class("c-2", "Power Lift", ClassKind::Gym, 5, 1),
            class("c-3", "Salsa", ClassKind::Dance, 20, 2),
            class("c-4", "Evening Flow", ClassKind::Yoga, 8, 10),
            class("c-5", "Circuit", ClassKind::Gym, 5, 1),
        ]
    }

    fn ids(page: &ClassPage) -> Vec<&str> {
        page.classes.iter().map(|c| c.id().as_ref()).collect()
    }

    #[test]
    fn default_query_orders_by_start_time_then_id() {
        let page = ListingQuery::new().apply(catalog());
        assert_eq!(ids(&page), vec!["c-2", "c-5", "c-3", "c-1", "c-4"]);
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_next());
    }

    #[test]
    fn kind_filter_keeps_only_that_kind() {
        let page = ListingQuery::new().kind(ClassKind::Yoga).apply(catalog());
        assert_eq!(ids(&page), vec!["c-1", "c-4"]);
        assert_eq!(page.total, 2);
    }

    #[test]
    fn start_filter_is_inclusive() {
        let from = Timestamp::new(base_time().into_datetime() + Duration::hours(2));
        let page = ListingQuery::new().starting_from(from).apply(catalog());
        assert_eq!(ids(&page), vec!["c-3", "c-1", "c-4"]);
    }

    #[test]
    fn sort_by_name_and_capacity() {
        let by_name = ListingQuery::new().sort_by(SortField::Name).apply(catalog());
        assert_eq!(ids(&by_name), vec!["c-5", "c-4", "c-1", "c-2", "c-3"]);

        let by_capacity = ListingQuery::new()
            .sort_by(SortField::Capacity)
            .apply(catalog());
        assert_eq!(ids(&by_capacity), vec!["c-2", "c-5", "c-4", "c-1", "c-3"]);
    }

    #[test]
    fn sort_by_kind_uses_kind_names_then_id() {
        let by_kind = ListingQuery::new().sort_by(SortField::Kind).apply(catalog());
        assert_eq!(ids(&by_kind), vec!["c-3", "c-2", "c-5", "c-1", "c-4"]);

        let query: ListingQuery = serde_json::from_str(r#"{"sort":"kind"}"#).unwrap();
        assert_eq!(query.sort(), SortField::Kind);
    }

    #[test]
    fn pagination_reports_totals() {
        let query = ListingQuery::new()
            .page_size(PageSize::try_new(2).unwrap())
            .page(PageNumber::try_new(2).unwrap());
        let page = query.apply(catalog());
        assert_eq!(ids(&page), vec!["c-3", "c-1"]);
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next());
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let query = ListingQuery::new()
            .page_size(PageSize::try_new(2).unwrap())
            .page(PageNumber::try_new(9).unwrap());
        let page = query.apply(catalog());
        assert!(page.classes.is_empty());
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn empty_catalog_has_zero_pages() {
        let page = ListingQuery::new().apply(Vec::new());
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
    }

    #[test]
    fn page_bounds_are_validated() {
        assert!(PageNumber::try_new(0).is_err());
        assert!(PageSize::try_new(0).is_err());
        assert!(PageSize::try_new(1001).is_err());
        assert_eq!(PageSize::default().into_inner(), 100);
        assert_eq!(PageNumber::default().into_inner(), 1);
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let query: ListingQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query, ListingQuery::new());

        let query: ListingQuery =
            serde_json::from_str(r#"{"kind":"gym","page_size":3,"sort":"name"}"#).unwrap();
        assert_eq!(query.kind_filter(), Some(ClassKind::Gym));
        assert_eq!(query.size().into_inner(), 3);
        assert_eq!(query.sort(), SortField::Name);

        assert!(serde_json::from_str::<ListingQuery>(r#"{"page":0}"#).is_err());
    }

    proptest! {
        #[test]
        fn pages_partition_the_matching_classes(
            capacities in proptest::collection::vec(1u32..50, 0..40),
            page_size in 1u32..7,
        ) {
            let classes: Vec<ClassRecord> = capacities
                .iter()
                .enumerate()
                .map(|(i, cap)| class(&format!("c-{i:02}"), "Spin", ClassKind::Gym, *cap, i as i64 % 5))
                .collect();
            let size = PageSize::try_new(page_size).unwrap();
            let first = ListingQuery::new().page_size(size).apply(classes.clone());

            let mut seen = Vec::new();
            for page in 1..=first.total_pages.max(1) {
                let query = ListingQuery::new()
                    .page_size(size)
                    .sort_by(SortField::Capacity)
                    .page(PageNumber::try_new(u32::try_from(page).unwrap()).unwrap());
                let result = query.apply(classes.clone());
                prop_assert!(result.classes.len() <= page_size as usize);
                seen.extend(result.classes);
            }

            prop_assert_eq!(seen.len(), classes.len());
            let by_capacity = ListingQuery::new().sort_by(SortField::Capacity);
            let strictly_ordered = seen
                .windows(2)
                .all(|w| by_capacity.compare(&w[0], &w[1]) == Ordering::Less);
            prop_assert!(strictly_ordered);
        }
    }
}
