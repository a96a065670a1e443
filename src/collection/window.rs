//! Listing parameters and the caller-visible page window.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::models::Record;

/// Extra query parameters merged into every raw listing request.
pub type Params = BTreeMap<String, String>;

/// Client-side predicate applied to every raw record.
pub type FilterFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Sort direction, sent as `sortdir=1` or `sortdir=-1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDir {
    #[default]
    Ascending,
    Descending,
}

impl SortDir {
    pub fn as_param(self) -> &'static str {
        match self {
            SortDir::Ascending => "1",
            SortDir::Descending => "-1",
        }
    }
}

impl fmt::Display for SortDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

/// Hook invoked with every committed page, in declaration order.
///
/// Extensions are fixed when the collection is built; they observe pages,
/// they cannot replace the fetch logic.
pub trait PageExtension: Send + Sync {
    fn page_committed(&self, resource: &str, window: &PageWindow<'_>);
}

/// Snapshot of what the caller currently sees.
#[derive(Debug, Clone, Copy)]
pub struct PageWindow<'a> {
    pub records: &'a [Record],
    /// Raw records consumed so far.
    pub offset: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    /// Negative before any page has been fetched.
    pub page_num: i64,
}

impl PageWindow<'_> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().filter_map(Record::id).collect()
    }
}
