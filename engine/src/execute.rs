//! Local evaluation of a query over an in-memory entity set.
//!
//! Backends that hold entities in memory (pinned cache entries, test data
//! services) use this to answer a [`QuerySpec`] the way a server would.

use crate::compare::compare;
use crate::{Entity, QuerySpec, ResultSet};

/// Evaluate `spec` over `entities`.
///
/// Entities are filtered, sorted with a stable sort, then `skip` and `limit`
/// are applied. When the query asks for a count it is the number of matching
/// entities before pagination.
pub fn execute<'a, I>(spec: &QuerySpec, entities: I) -> ResultSet
where
    I: IntoIterator<Item = &'a Entity>,
{
    let mut matching: Vec<Entity> = entities
        .into_iter()
        .filter(|e| spec.matches(e))
        .cloned()
        .collect();

    if !spec.sort_specifiers().is_empty() {
        matching.sort_by(|a, b| compare(a, b, spec.sort_specifiers()));
    }

    let total = matching.len();
    let page = matching
        .into_iter()
        .skip(spec.page_skip())
        .take(spec.page_limit().unwrap_or(usize::MAX))
        .collect();

    if spec.wants_count() {
        ResultSet::counted(page, total)
    } else {
        ResultSet::new(page)
    }
}
