//! Cursor-based walks over the document listing and over views.
//!
//! Pages are fetched with one extra row. That lookahead row is not emitted;
//! its `(key, doc id)` position is where the next page starts, so runs of
//! duplicate keys that straddle a page boundary are neither skipped nor
//! repeated.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::db::{DocRow, Store, ViewKey, ViewQuery, ViewRow};
use crate::error::{PagerError, StoreError};

/// Position of a row in its ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Cursor<K> {
    key: K,
    id: String,
}

/// Transient state of one walk.
struct PageState<K> {
    startkey: Option<Cursor<K>>,
    last_emitted: Option<Cursor<K>>,
    page_size: usize,
}

pub struct Pager<'a, S: Store> {
    store: &'a S,
    db: &'a str,
}

impl<'a, S: Store> Pager<'a, S> {
    pub fn new(store: &'a S, db: &'a str) -> Self {
        Pager { store, db }
    }

    /// Every document, `count` rows per call of `f`. Returns the rows emitted.
    pub fn walk_all<F>(&self, count: usize, f: F) -> Result<usize, PagerError>
    where
        F: FnMut(&[DocRow]),
    {
        walk_pages(
            count,
            |cursor: Option<&Cursor<String>>, limit| {
                self.store
                    .list_documents(self.db, cursor.map(|c| c.id.as_str()), limit)
            },
            |row: &DocRow| Cursor {
                key: row.key.clone(),
                id: row.id.clone(),
            },
            f,
        )
    }

    /// Every raw row of a view, `count` rows per call of `f`.
    pub fn walk_view<F>(&self, index: &str, count: usize, f: F) -> Result<usize, PagerError>
    where
        F: FnMut(&[ViewRow]),
    {
        walk_pages(
            count,
            |cursor: Option<&Cursor<ViewKey>>, limit| {
                let mut query = ViewQuery::new().reduce(false).limit(limit);
                if let Some(c) = cursor {
                    query = query.startkey(Some(c.key.clone())).startkey_docid(c.id.clone());
                }
                self.store.query_index(self.db, index, &query)
            },
            |row: &ViewRow| Cursor {
                key: row_key(row),
                id: row.id.clone().unwrap_or_default(),
            },
            f,
        )
    }

    /// Client-side group-by: calls `f(key, values)` once per distinct key in
    /// `[firstkey, lastkey)`, in key order. Returns the number of keys emitted.
    ///
    /// Holds at most one page plus one key's run in memory.
    pub fn walk_groups<F>(
        &self,
        index: &str,
        count: usize,
        firstkey: Option<ViewKey>,
        lastkey: Option<&ViewKey>,
        mut f: F,
    ) -> Result<usize, PagerError>
    where
        F: FnMut(ViewKey, Vec<Value>),
    {
        if count == 0 {
            return Err(PagerError::InvalidPageSize);
        }
        let past_end = |key: &ViewKey| lastkey.is_some_and(|last| key >= last);

        let mut startkey = firstkey;
        let mut groups = 0usize;
        loop {
            let page = self.fetch(
                index,
                ViewQuery::new()
                    .startkey(startkey.clone())
                    .endkey(lastkey.cloned())
                    .limit(count),
            )?;
            let (Some(first), Some(last)) = (page.first(), page.last()) else {
                break;
            };
            let first_key = row_key(first);
            let end_key = row_key(last);

            if first_key == end_key {
                // The page is one run. Fetch the whole run, then probe past it.
                if past_end(&end_key) {
                    break;
                }
                let run = self.fetch(index, ViewQuery::new().key(end_key.clone()))?;
                let Some(last_id) = run.last().and_then(|r| r.id.clone()) else {
                    break;
                };
                let probe = self.fetch(
                    index,
                    ViewQuery::new()
                        .startkey(Some(end_key.clone()))
                        .startkey_docid(last_id.clone())
                        .limit(2),
                )?;
                groups += emit_groups(run, &mut f);

                let next = probe.last().map(row_key);
                match next.as_ref().map(|k| k.cmp(&end_key)) {
                    Some(Ordering::Greater) if !next.as_ref().is_some_and(past_end) => {
                        startkey = next;
                    }
                    Some(Ordering::Less) => {
                        return Err(PagerError::Stalled {
                            key: end_key.to_string(),
                            id: last_id,
                        })
                    }
                    _ => break,
                }
            } else {
                let mut rows = Vec::with_capacity(page.len());
                let mut reached_end = false;
                for row in page {
                    let key = row_key(&row);
                    if past_end(&key) {
                        reached_end = true;
                        break;
                    }
                    if key == end_key {
                        break;
                    }
                    rows.push(row);
                }
                groups += emit_groups(rows, &mut f);
                if reached_end {
                    break;
                }
                if startkey.as_ref().is_some_and(|s| &end_key <= s) {
                    return Err(PagerError::Stalled {
                        key: end_key.to_string(),
                        id: String::new(),
                    });
                }
                debug!("Next group page from {}", end_key);
                startkey = Some(end_key);
            }
        }
        Ok(groups)
    }

    fn fetch(&self, index: &str, query: ViewQuery) -> Result<Vec<ViewRow>, StoreError> {
        self.store.query_index(self.db, index, &query.reduce(false))
    }
}

fn row_key(row: &ViewRow) -> ViewKey {
    row.key.clone().unwrap_or_default()
}

/// Call `f` once per run of equal keys, in order.
fn emit_groups<F>(rows: Vec<ViewRow>, f: &mut F) -> usize
where
    F: FnMut(ViewKey, Vec<Value>),
{
    let mut emitted = 0;
    let mut current: Option<(ViewKey, Vec<Value>)> = None;
    for row in rows {
        let key = row_key(&row);
        if let Some((k, values)) = &mut current {
            if *k == key {
                values.push(row.value);
                continue;
            }
        }
        if let Some((k, values)) = current.replace((key, vec![row.value])) {
            f(k, values);
            emitted += 1;
        }
    }
    if let Some((k, values)) = current {
        f(k, values);
        emitted += 1;
    }
    emitted
}

/// Lookahead paging shared by `walk_all` and `walk_view`.
fn walk_pages<R, K, Fetch, Pos, F>(
    count: usize,
    mut fetch: Fetch,
    position: Pos,
    mut f: F,
) -> Result<usize, PagerError>
where
    K: Clone + PartialEq + fmt::Display,
    Fetch: FnMut(Option<&Cursor<K>>, usize) -> Result<Vec<R>, StoreError>,
    Pos: Fn(&R) -> Cursor<K>,
    F: FnMut(&[R]),
{
    if count == 0 {
        return Err(PagerError::InvalidPageSize);
    }
    let mut state = PageState {
        startkey: None,
        last_emitted: None,
        page_size: count,
    };
    let mut emitted = 0usize;

    loop {
        let mut rows = fetch(state.startkey.as_ref(), state.page_size + 1)?;
        if rows.len() <= state.page_size {
            if !rows.is_empty() {
                f(&rows);
                emitted += rows.len();
            }
            return Ok(emitted);
        }

        rows.truncate(state.page_size + 1);
        let Some(lookahead) = rows.pop() else {
            return Ok(emitted);
        };
        let next = position(&lookahead);
        if state.startkey.as_ref() == Some(&next) {
            return Err(PagerError::Stalled {
                key: next.key.to_string(),
                id: next.id,
            });
        }

        f(&rows);
        emitted += rows.len();
        state.last_emitted = rows.last().map(&position);
        if let Some(last) = &state.last_emitted {
            debug!("Emitted page ending at {} ({}), next from {}", last.key, last.id, next.key);
        }
        state.startkey = Some(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::views::{DesignDocument, EmitValue, IndexDefinition};
    use crate::db::SqliteStore;
    use serde_json::json;

    const DB: &str = "pager";
    const BY_LETTER: &str = "test/by_letter";

    fn store_with(rows: &[(&str, i64)]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_collection(DB).unwrap();
        let design = DesignDocument::new("test")
            .with_view("by_letter", IndexDefinition::new(["letter"], EmitValue::Doc));
        store.insert(DB, &design.to_value().unwrap()).unwrap();
        for (letter, n) in rows {
            store
                .insert(
                    DB,
                    &json!({"_id": format!("d{:03}", n), "letter": letter, "n": n}),
                )
                .unwrap();
        }
        store
    }

    fn groups(
        store: &SqliteStore,
        count: usize,
        first: Option<&str>,
        last: Option<&str>,
    ) -> Vec<(String, Vec<i64>)> {
        let mut out = Vec::new();
        let lastkey = last.map(ViewKey::text);
        Pager::new(store, DB)
            .walk_groups(
                BY_LETTER,
                count,
                first.map(ViewKey::text),
                lastkey.as_ref(),
                |key, values| {
                    let ns = values.iter().map(|v| v["n"].as_i64().unwrap()).collect();
                    out.push((key.parts()[0].clone(), ns));
                },
            )
            .unwrap();
        out
    }

    fn uneven_rows() -> Vec<(&'static str, i64)> {
        let mut rows = Vec::new();
        let mut n = 0;
        for (letter, run) in [("a", 1), ("b", 5), ("c", 2), ("d", 1), ("e", 7), ("f", 3)] {
            for _ in 0..run {
                n += 1;
                rows.push((letter, n));
            }
        }
        rows
    }

    #[test]
    fn groups_duplicate_keys_across_pages() {
        let store = store_with(&[("a", 1), ("a", 2), ("b", 3), ("b", 4), ("c", 5)]);
        assert_eq!(
            groups(&store, 2, None, None),
            [
                ("a".to_string(), vec![1, 2]),
                ("b".to_string(), vec![3, 4]),
                ("c".to_string(), vec![5]),
            ]
        );
    }

    #[test]
    fn grouping_does_not_depend_on_page_size() {
        let rows = uneven_rows();
        let store = store_with(&rows);
        let expected: Vec<i64> = rows.iter().map(|(_, n)| *n).collect();

        for count in 1..=12 {
            let got = groups(&store, count, None, None);
            let letters: Vec<_> = got.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(letters, ["a", "b", "c", "d", "e", "f"], "page size {}", count);

            let flat: Vec<i64> = got.iter().flat_map(|(_, ns)| ns.clone()).collect();
            assert_eq!(flat, expected, "page size {}", count);

            for (letter, ns) in &got {
                let run = rows.iter().filter(|(l, _)| l == letter).count();
                assert_eq!(ns.len(), run, "key {} at page size {}", letter, count);
            }
        }
    }

    #[test]
    fn groups_respect_key_range() {
        let store = store_with(&uneven_rows());
        for count in 1..=8 {
            let got = groups(&store, count, Some("b"), Some("e"));
            let letters: Vec<_> = got.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(letters, ["b", "c", "d"], "page size {}", count);
        }
        let got = groups(&store, 3, Some("bb"), Some("z"));
        assert_eq!(got[0].0, "c");
        assert_eq!(got.len(), 4);
    }

    #[test]
    fn empty_view_emits_nothing() {
        let store = store_with(&[]);
        assert!(groups(&store, 3, None, None).is_empty());
    }

    #[test]
    fn walk_all_is_page_size_independent() {
        let rows: Vec<_> = (1..=10).map(|n| ("x", n)).collect();
        let store = store_with(&rows);
        let all: Vec<String> = store
            .list_documents(DB, None, usize::MAX)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(all.len(), 11);

        for count in 1..=12 {
            let mut seen = Vec::new();
            let mut pages = 0;
            let n = Pager::new(&store, DB)
                .walk_all(count, |page| {
                    assert!(page.len() <= count);
                    pages += 1;
                    seen.extend(page.iter().map(|r| r.id.clone()));
                })
                .unwrap();
            assert_eq!(seen, all, "page size {}", count);
            assert_eq!(n, all.len());
            assert_eq!(pages, all.len().div_ceil(count).max(1));
        }
    }

    #[test]
    fn walk_view_crosses_duplicate_runs() {
        let store = store_with(&uneven_rows());
        let all: Vec<String> = store
            .query_index(DB, BY_LETTER, &ViewQuery::new())
            .unwrap()
            .into_iter()
            .filter_map(|r| r.id)
            .collect();

        for count in 1..=20 {
            let mut seen = Vec::new();
            Pager::new(&store, DB)
                .walk_view(BY_LETTER, count, |page| {
                    seen.extend(page.iter().filter_map(|r| r.id.clone()));
                })
                .unwrap();
            assert_eq!(seen, all, "page size {}", count);
        }
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let store = store_with(&[("a", 1)]);
        let pager = Pager::new(&store, DB);
        assert!(matches!(pager.walk_all(0, |_| {}), Err(PagerError::InvalidPageSize)));
        assert!(matches!(
            pager.walk_view(BY_LETTER, 0, |_| {}),
            Err(PagerError::InvalidPageSize)
        ));
        assert!(matches!(
            pager.walk_groups(BY_LETTER, 0, None, None, |_, _| {}),
            Err(PagerError::InvalidPageSize)
        ));
    }

    #[test]
    fn unknown_index_is_a_store_error() {
        let store = store_with(&[]);
        let err = Pager::new(&store, DB)
            .walk_groups("test/missing", 2, None, None, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, PagerError::Store(StoreError::UnknownIndex(_))));
    }

    #[test]
    fn cursor_that_does_not_advance_fails_loudly() {
        let rows = vec!["a".to_string(), "a".to_string(), "b".to_string()];
        let mut pages = 0;
        let err = walk_pages(
            2,
            |_cursor: Option<&Cursor<String>>, _limit| Ok(rows.clone()),
            |row: &String| Cursor {
                key: row.clone(),
                id: row.clone(),
            },
            |_| pages += 1,
        )
        .unwrap_err();
        assert!(matches!(err, PagerError::Stalled { ref key, .. } if key == "b"));
        assert_eq!(pages, 1);
    }
}
