//! Parallel image search.
//!
//! Each root is expanded into work items: files directly under a root are
//! checked on their own, every immediate subdirectory becomes one item that a
//! worker walks with [`ignore::WalkBuilder`].

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use ignore::WalkBuilder;

use super::ExtensionMatcher;
use crate::config::SearchConfig;
use crate::engine::{BatchItem, BatchReport, BatchRunner, ItemContext, ItemOutcome};

/// One unit of search work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchItem {
    File(PathBuf),
    Tree(PathBuf),
}

impl BatchItem for SearchItem {
    fn describe(&self) -> String {
        match self {
            SearchItem::File(path) | SearchItem::Tree(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub extensions: Vec<String>,
    pub follow_links: bool,
    /// 0 means unlimited
    pub max_depth: usize,
}

impl From<&SearchConfig> for SearchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            follow_links: config.follow_links,
            max_depth: config.max_depth,
        }
    }
}

pub struct SearchResult {
    pub report: BatchReport,
    pub hits: Vec<PathBuf>,
}

/// Turn roots into search items. Unreadable or missing roots are logged and skipped.
pub fn expand_roots(roots: &[PathBuf], max_depth: usize) -> Vec<SearchItem> {
    let mut items = Vec::new();
    for root in roots {
        if root.is_file() {
            items.push(SearchItem::File(root.clone()));
            continue;
        }

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", root.display(), e);
                continue;
            }
        };

        let mut files = Vec::new();
        let mut trees = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => trees.push(SearchItem::Tree(path)),
                Ok(kind) if kind.is_file() => files.push(SearchItem::File(path)),
                Ok(kind) if kind.is_symlink() && path.is_dir() => trees.push(SearchItem::Tree(path)),
                Ok(kind) if kind.is_symlink() && path.is_file() => files.push(SearchItem::File(path)),
                _ => {}
            }
        }
        files.sort_by(|a, b| a.describe().cmp(&b.describe()));
        trees.sort_by(|a, b| a.describe().cmp(&b.describe()));

        items.extend(files);
        if max_depth != 1 {
            items.extend(trees);
        }
    }
    items
}

/// Search `roots` for images, returning the hits in sorted order.
pub fn search(runner: &BatchRunner, roots: &[PathBuf], options: &SearchOptions) -> Result<SearchResult> {
    let matcher = ExtensionMatcher::new(options.extensions.as_slice())?;
    let items = expand_roots(roots, options.max_depth);
    let hits = Arc::new(Mutex::new(BTreeSet::new()));

    let sink = Arc::clone(&hits);
    let follow_links = options.follow_links;
    // Subtrees start one level below the root.
    let subtree_depth = (options.max_depth > 1).then(|| options.max_depth - 1);

    let report = runner.run("Searching", items, 0, move |item, ctx| match item {
        SearchItem::File(path) => {
            if matcher.matches(path) {
                record_hit(&sink, path);
                ItemOutcome::Completed(format!("{}: 1 image", path.display()))
            } else {
                ItemOutcome::Skipped(format!("{}: not an image", path.display()))
            }
        }
        SearchItem::Tree(dir) => walk_tree(dir, &matcher, follow_links, subtree_depth, &sink, ctx),
    })?;

    let hits = std::mem::take(&mut *hits.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(SearchResult {
        report,
        hits: hits.into_iter().collect(),
    })
}

fn walk_tree(
    dir: &Path,
    matcher: &ExtensionMatcher,
    follow_links: bool,
    max_depth: Option<usize>,
    sink: &Mutex<BTreeSet<PathBuf>>,
    ctx: &ItemContext<'_>,
) -> ItemOutcome {
    let mut builder = WalkBuilder::new(dir);
    builder
        .standard_filters(false)    // Images hide in ignored and hidden folders too
        .hidden(false)
        .follow_links(follow_links)
        .max_depth(max_depth);

    let mut found = 0usize;
    for entry in builder.build() {
        if ctx.is_cancelled() {
            return ItemOutcome::Cancelled(format!("{}: search interrupted after {} image(s)", dir.display(), found));
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };

        let is_file = entry.file_type().is_some_and(|t| t.is_file()) || (follow_links && entry.path().is_file());
        if is_file && matcher.matches(entry.path()) {
            record_hit(sink, entry.path());
            found += 1;
        }
    }

    ItemOutcome::Completed(format!("{}: {} image(s)", dir.display(), found))
}

fn record_hit(sink: &Mutex<BTreeSet<PathBuf>>, path: &Path) {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    tracing::trace!("found {}", path.display());
    sink.lock().unwrap_or_else(PoisonError::into_inner).insert(path);
}
