#![no_main]

//! Fuzz target for comment thread assembly.
//!
//! Parent links are drawn from a tiny id space so that duplicates, self
//! references, dangling parents and cycles all show up quickly. Every
//! distinct id must land in the forest exactly once.

use std::collections::HashSet;

use arbitrary::Arbitrary;
use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;

use collab::comments::{build_forest, flatten, subtree_ids};
use collab::models::{Comment, CommentTarget};

#[derive(Arbitrary, Debug)]
struct RawComment {
    id: u8,
    parent: Option<u8>,
    text: String,
}

#[derive(Arbitrary, Debug)]
struct ForestInput {
    comments: Vec<RawComment>,
    delete: u8,
}

fn id(n: u8) -> String {
    format!("c{}", n % 16)
}

fuzz_target!(|input: ForestInput| {
    let comments: Vec<Comment> = input
        .comments
        .iter()
        .take(64)
        .enumerate()
        .map(|(i, raw)| Comment {
            id: id(raw.id),
            target: CommentTarget::Task("t".to_string()),
            parent_id: raw.parent.map(id),
            author_name: "fuzz".to_string(),
            text: raw.text.clone(),
            owner_id: "u".to_string(),
            created_at: Utc.timestamp_opt(i as i64, 0).unwrap(),
        })
        .collect();

    let forest = build_forest(&comments);
    let flat = flatten(&forest);

    let distinct: HashSet<&str> = comments.iter().map(|c| c.id.as_str()).collect();
    let placed: HashSet<&str> = flat.iter().map(|(c, _)| c.id.as_str()).collect();
    assert_eq!(flat.len(), distinct.len());
    assert_eq!(placed, distinct);

    let doomed = subtree_ids(&comments, &id(input.delete));
    let unique: HashSet<&String> = doomed.iter().collect();
    assert_eq!(unique.len(), doomed.len());
    if let Some(last) = doomed.last() {
        assert_eq!(last, &id(input.delete));
    }
});
