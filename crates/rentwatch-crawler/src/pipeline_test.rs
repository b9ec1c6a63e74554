use std::collections::HashMap;

use async_trait::async_trait;
use rentwatch_proxy::{FetchResult, FetchStatus, ProxyError, SessionState};
use serde_json::json;

use super::*;
use crate::sink::DirSink;
use crate::trim::NextDataTrimmer;

const SEARCH: &str = "https://site.test/search?page=";
const BASE: &str = "https://site.test/listings";

#[derive(Clone)]
enum Reply {
    Body(Vec<u8>),
    NotFound,
    Exhausted,
    Inactive,
}

/// Answers from a fixed URL table; unknown URLs are 404s.
#[derive(Default)]
struct ScriptedFetcher {
    replies: HashMap<String, Reply>,
    calls: Vec<String>,
}

impl ScriptedFetcher {
    fn reply(mut self, url: &str, reply: Reply) -> Self {
        self.replies.insert(url.to_owned(), reply);
        self
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&mut self, url: &str) -> Result<FetchResult, ProxyError> {
        self.calls.push(url.to_owned());
        match self.replies.get(url).cloned().unwrap_or(Reply::NotFound) {
            Reply::Body(body) => Ok(FetchResult {
                status: FetchStatus::Ok,
                payload: Some(body),
                final_url: url.to_owned(),
            }),
            Reply::NotFound => Ok(FetchResult {
                status: FetchStatus::NotFound,
                payload: None,
                final_url: url.to_owned(),
            }),
            Reply::Exhausted => Err(ProxyError::FetchExhausted {
                url: url.to_owned(),
                attempts: 3,
            }),
            Reply::Inactive => Err(ProxyError::NotActive {
                state: SessionState::Failed,
            }),
        }
    }
}

fn settings() -> CrawlSettings {
    CrawlSettings {
        search_url: SEARCH.to_owned(),
        listing_base_url: BASE.to_owned(),
        page_size: 15,
    }
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
}

fn pipeline(fetcher: ScriptedFetcher) -> CrawlPipeline<ScriptedFetcher> {
    CrawlPipeline::new(fetcher, settings()).with_date(day())
}

fn next_data_page(data: &serde_json::Value) -> Reply {
    Reply::Body(
        format!(r#"<html><body><main>cards</main><script id="__NEXT_DATA__" type="application/json">{data}</script></body></html>"#)
            .into_bytes(),
    )
}

fn search_page(total: u64, uris: &[&str]) -> Reply {
    let mut cache = serde_json::Map::new();
    cache.insert(
        "ROOT_QUERY".to_owned(),
        json!({"listAdverts({})": {"totalCount": total}}),
    );
    for uri in uris {
        cache.insert(format!("Advert:{uri}"), json!({"uri": uri}));
    }
    next_data_page(&json!({"props": {"pageProps": {"apolloCache": cache}}}))
}

fn body_of(reply: Reply) -> Vec<u8> {
    match reply {
        Reply::Body(body) => body,
        _ => panic!("expected a body reply"),
    }
}

fn image(id: i64, filename: &str, status: DownloadStatus) -> ImageRecord {
    ImageRecord {
        id,
        listing_id: "L9".to_owned(),
        filename: filename.to_owned(),
        object_name: format!("images/L9/{filename}"),
        url: format!("https://cdn.test/{filename}"),
        downloaded: status,
    }
}

// ---------------------------------------------------------------------------
// discovery
// ---------------------------------------------------------------------------

#[test]
fn page_count_from_payload_rounds_up() {
    assert_eq!(page_count_from_payload(&body_of(search_page(31, &[])), 15), 3);
}

#[test]
fn page_count_from_payload_without_block_is_zero() {
    assert_eq!(page_count_from_payload(b"<html>blocked</html>", 15), 0);
}

#[tokio::test]
async fn discover_page_count_fetches_first_page() {
    let fetcher =
        ScriptedFetcher::default().reply(&format!("{SEARCH}1"), search_page(16, &[]));
    let mut p = pipeline(fetcher);

    assert_eq!(p.discover_page_count().await.unwrap(), 2);
    assert_eq!(p.fetcher_mut().calls, vec![format!("{SEARCH}1")]);
}

#[tokio::test]
async fn discover_page_count_tolerates_exhausted_first_page() {
    let fetcher = ScriptedFetcher::default().reply(&format!("{SEARCH}1"), Reply::Exhausted);
    let mut p = pipeline(fetcher);
    assert_eq!(p.discover_page_count().await.unwrap(), 0);
}

#[tokio::test]
async fn discover_page_count_propagates_inactive_session() {
    let fetcher = ScriptedFetcher::default().reply(&format!("{SEARCH}1"), Reply::Inactive);
    let mut p = pipeline(fetcher);
    assert!(matches!(
        p.discover_page_count().await,
        Err(CrawlError::Proxy(ProxyError::NotActive { .. }))
    ));
}

// ---------------------------------------------------------------------------
// pages and listings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_pages_skips_failures_and_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirSink::new(dir.path());
    let fetcher = ScriptedFetcher::default()
        .reply(&format!("{SEARCH}1"), search_page(45, &["a"]))
        .reply(&format!("{SEARCH}2"), Reply::Exhausted)
        .reply(&format!("{SEARCH}3"), search_page(45, &["c"]));
    let mut p = pipeline(fetcher);

    let written = p.fetch_pages(3, &sink).await.unwrap();

    assert_eq!(written, 2);
    assert_eq!(
        p.fetcher_mut().calls,
        vec![format!("{SEARCH}1"), format!("{SEARCH}2"), format!("{SEARCH}3")]
    );
    assert_eq!(
        sink.keys_with_prefix("").await.unwrap(),
        vec!["240103_1", "240103_3"]
    );
}

#[tokio::test]
async fn fetch_pages_aborts_on_inactive_session() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirSink::new(dir.path());
    let fetcher = ScriptedFetcher::default().reply(&format!("{SEARCH}1"), Reply::Inactive);
    let mut p = pipeline(fetcher);

    assert!(p.fetch_pages(3, &sink).await.is_err());
    assert_eq!(p.fetcher_mut().calls.len(), 1);
}

#[tokio::test]
async fn extract_listing_urls_reads_only_todays_pages() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirSink::new(dir.path());
    sink.write("240103_1", &body_of(search_page(30, &["1-a", "2-b"]))).await.unwrap();
    sink.write("240103_2", &body_of(search_page(30, &["2-b", "3-c"]))).await.unwrap();
    sink.write("240102_1", &body_of(search_page(30, &["old"]))).await.unwrap();
    sink.write("240103_9", b"not html at all").await.unwrap();

    let urls = pipeline(ScriptedFetcher::default())
        .extract_listing_urls(&sink)
        .await
        .unwrap();

    assert_eq!(
        urls,
        vec![
            format!("{BASE}/1-a"),
            format!("{BASE}/2-b"),
            format!("{BASE}/3-c"),
        ]
    );
}

#[tokio::test]
async fn fetch_listings_indexes_from_one_and_trims() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirSink::new(dir.path());
    let urls = vec![format!("{BASE}/1-a"), format!("{BASE}/2-b"), format!("{BASE}/3-c")];
    let fetcher = ScriptedFetcher::default()
        .reply(&urls[0], next_data_page(&json!({"n": 1})))
        .reply(&urls[2], next_data_page(&json!({"n": 3})));
    let mut p = pipeline(fetcher).with_trimmer(NextDataTrimmer);

    let written = p.fetch_listings(&urls, &sink).await.unwrap();

    assert_eq!(written, 2);
    assert_eq!(
        sink.keys_with_prefix("").await.unwrap(),
        vec!["240103_1", "240103_3"]
    );
    let staged = String::from_utf8(sink.read("240103_3").await.unwrap()).unwrap();
    assert!(staged.starts_with("<script"), "{staged}");
    assert!(!staged.contains("<main>"));
}

#[tokio::test]
async fn crawl_runs_every_stage() {
    let pages_dir = tempfile::tempdir().unwrap();
    let listings_dir = tempfile::tempdir().unwrap();
    let pages = DirSink::new(pages_dir.path());
    let listings = DirSink::new(listings_dir.path());
    let fetcher = ScriptedFetcher::default()
        .reply(&format!("{SEARCH}1"), search_page(20, &["1-a"]))
        .reply(&format!("{SEARCH}2"), search_page(20, &["2-b"]))
        .reply(&format!("{BASE}/1-a"), next_data_page(&json!({"id": "1"})))
        .reply(&format!("{BASE}/2-b"), next_data_page(&json!({"id": "2"})));
    let mut p = pipeline(fetcher);

    let summary = p.crawl(&pages, &listings).await.unwrap();

    assert_eq!(
        summary,
        CrawlSummary {
            pages_discovered: 2,
            pages_written: 2,
            listing_urls: 2,
            listings_written: 2,
        }
    );
}

#[tokio::test]
async fn crawl_with_no_pages_fetches_nothing_else() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirSink::new(dir.path());
    let fetcher = ScriptedFetcher::default()
        .reply(&format!("{SEARCH}1"), Reply::Body(b"<html>captcha</html>".to_vec()));
    let mut p = pipeline(fetcher);

    let summary = p.crawl(&sink, &sink).await.unwrap();

    assert_eq!(summary, CrawlSummary::default());
    assert_eq!(p.into_fetcher().calls.len(), 1);
}

// ---------------------------------------------------------------------------
// images
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_images_moves_statuses_along_legal_edges() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirSink::new(dir.path());
    let fetcher = ScriptedFetcher::default()
        .reply("https://cdn.test/ok.jpg", Reply::Body(vec![1, 2, 3]))
        .reply("https://cdn.test/flaky.jpg", Reply::Exhausted);
    let mut records = vec![
        image(1, "ok.jpg", DownloadStatus::Pending),
        image(2, "gone.jpg", DownloadStatus::Pending),
        image(3, "flaky.jpg", DownloadStatus::Pending),
        image(4, "done.jpg", DownloadStatus::Archived),
    ];
    let mut p = pipeline(fetcher);

    let summary = p.fetch_images(&mut records, &sink).await.unwrap();

    assert_eq!(
        summary,
        ImageFetchSummary {
            downloaded: 1,
            failed: 1,
            skipped: 1,
        }
    );
    assert_eq!(records[0].downloaded, DownloadStatus::Downloaded);
    assert_eq!(records[1].downloaded, DownloadStatus::Failed);
    assert_eq!(records[2].downloaded, DownloadStatus::Pending);
    assert_eq!(records[3].downloaded, DownloadStatus::Archived);
    assert_eq!(sink.read("L9-ok.jpg").await.unwrap(), vec![1, 2, 3]);
    assert!(
        !p.fetcher_mut()
            .calls
            .contains(&"https://cdn.test/done.jpg".to_owned())
    );
}

#[tokio::test]
async fn fetch_images_leaves_pending_when_staging_fails() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirSink::new(dir.path());
    let fetcher =
        ScriptedFetcher::default().reply("https://cdn.test/sub/x.jpg", Reply::Body(vec![0]));
    // a '/' in the filename makes the staging key invalid
    let mut records = vec![image(1, "sub/x.jpg", DownloadStatus::Pending)];

    let summary = pipeline(fetcher)
        .fetch_images(&mut records, &sink)
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(records[0].downloaded, DownloadStatus::Pending);
}
