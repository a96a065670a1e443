//! Paging through a filtered listing forwards and back.

use std::sync::Arc;

use girder_client::collection::{Collection, Params, SortDir};
use girder_client::context::AppContext;
use girder_client::events::{AppEvent, CollectionEvent};
use girder_client::models::Record;
use girder_client::testing::{named_records, MockTransport};

fn every_third(record: &Record) -> bool {
    record
        .name()
        .and_then(|name| name.trim_start_matches("doc").parse::<usize>().ok())
        .is_some_and(|n| n % 3 == 0)
}

fn names(collection: &Collection) -> Vec<&str> {
    collection
        .records()
        .iter()
        .filter_map(Record::name)
        .collect()
}

// ============================================================================
// Filtered navigation
// ============================================================================

#[tokio::test]
async fn filtered_pages_walk_forward_and_back_exactly() {
    let transport = MockTransport::listing(named_records("doc", 30));
    let ctx = AppContext::with_transport(Arc::new(transport.clone()));
    let mut collection = Collection::new(ctx, "item")
        .page_limit(4)
        .filter(every_third);

    collection.fetch(Params::new(), true).await.unwrap();
    assert_eq!(names(&collection), vec!["doc0", "doc3", "doc6", "doc9"]);
    assert_eq!(collection.offset(), 10);
    assert_eq!(collection.page_num(), 0);
    assert!(collection.has_next_page());
    assert!(!collection.has_previous_page());

    collection.fetch_next_page(Params::new()).await.unwrap();
    assert_eq!(names(&collection), vec!["doc12", "doc15", "doc18", "doc21"]);
    assert_eq!(collection.offset(), 22);

    collection.fetch_next_page(Params::new()).await.unwrap();
    assert_eq!(names(&collection), vec!["doc24", "doc27"]);
    assert_eq!(collection.offset(), 30);
    assert!(!collection.has_next_page());
    assert_eq!(collection.page_num(), 2);
    assert_eq!(collection.offset_stack().as_slice(), &[0, 10, 22]);

    collection.fetch_previous_page(Params::new()).await.unwrap();
    assert_eq!(names(&collection), vec!["doc12", "doc15", "doc18", "doc21"]);
    assert_eq!(collection.page_num(), 1);

    collection.fetch_previous_page(Params::new()).await.unwrap();
    assert_eq!(names(&collection), vec!["doc0", "doc3", "doc6", "doc9"]);
    assert_eq!(collection.page_num(), 0);
    assert!(!collection.has_previous_page());

    // Every raw request asks for one record more than a page.
    assert!(transport
        .requests()
        .iter()
        .all(|r| r.query_value("limit") == Some("5")));
}

#[tokio::test]
async fn stored_params_carry_over_to_the_next_page() {
    let transport = MockTransport::listing(named_records("doc", 12));
    let ctx = AppContext::with_transport(Arc::new(transport.clone()));
    let mut collection = Collection::new(ctx, "item")
        .page_limit(5)
        .sort("created", SortDir::Descending);

    let params: Params = [("folderId".to_string(), "f1".to_string())]
        .into_iter()
        .collect();
    collection.fetch(params, true).await.unwrap();

    let mut extra = Params::new();
    extra.insert("text".into(), "scan".into());
    collection.fetch_next_page(extra).await.unwrap();

    let last = transport.requests().pop().unwrap();
    assert_eq!(last.target_str(), "item");
    assert_eq!(last.query_value("folderId"), Some("f1"));
    assert_eq!(last.query_value("text"), Some("scan"));
    assert_eq!(last.query_value("sort"), Some("created"));
    assert_eq!(last.query_value("sortdir"), Some("-1"));
    assert_eq!(last.query_value("offset"), Some("5"));
    assert_eq!(collection.params().get("text").map(String::as_str), Some("scan"));
}

// ============================================================================
// Append mode
// ============================================================================

#[tokio::test]
async fn append_mode_accumulates_until_exhausted() {
    let transport = MockTransport::listing(named_records("doc", 25));
    let ctx = AppContext::with_transport(Arc::new(transport));
    let mut rx = ctx.subscribe();
    let mut collection = Collection::new(ctx, "folder").page_limit(10).append(true);

    collection.fetch(Params::new(), true).await.unwrap();
    while collection.has_next_page() {
        collection.fetch_next_page(Params::new()).await.unwrap();
    }

    assert_eq!(collection.len(), 25);
    assert_eq!(collection.offset(), 25);
    assert_eq!(collection.records()[24].id(), Some("id24"));
    assert_eq!(collection.offset_stack().depth(), 0);

    let mut counts = Vec::new();
    while let Ok(AppEvent::Collection(CollectionEvent::Changed { count, .. })) = rx.try_recv() {
        counts.push(count);
    }
    assert_eq!(counts, vec![10, 10, 5]);
}
