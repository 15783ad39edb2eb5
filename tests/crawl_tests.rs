mod common;

use common::fakes::{FakePage, ScriptedRenderer};
use fqdnfinder::crawler::{crawl, CrawlOptions};
use fqdnfinder::domain_utils::categorize;
use fqdnfinder::logger::{RunLogger, VerbosityLevel};
use fqdnfinder::rate_limit::RequestThrottle;
use fqdnfinder::render::{Renderer, SessionOptions};
use fqdnfinder::url_match::{normalize, SimilarityStrategy, UrlMatcher};

fn options(max_pages: usize) -> CrawlOptions {
    CrawlOptions {
        max_pages,
        throttle: RequestThrottle::disabled(),
        ..CrawlOptions::default()
    }
}

fn quiet_site() -> fqdnfinder::logger::SiteLogger {
    RunLogger::new(VerbosityLevel::Silent).for_site("example.com")
}

const HOME: &str = r#"<html><body>
    <a href="/products">Products</a>
    <a href="https://gone.example.com/">Old portal</a>
    <a href="/old-docs">Docs</a>
    <a href="/feed">Feed</a>
    <a href="/missing-page">Missing</a>
    <img src="https://cdn.example.com/logo.png">
    <script src="https://www.googletagmanager.com/gtm.js"></script>
</body></html>"#;

fn example_site() -> ScriptedRenderer {
    ScriptedRenderer::new()
        .page("https://example.com/", HOME)
        .page(
            "https://example.com/products",
            r#"<a href="https://shop.example.com/cart">Shop</a><a href="https://twitter.com/example">Follow</a>"#,
        )
        .redirect("https://example.com/old-docs", "https://docs.example.com/start")
        .page("https://docs.example.com/start", r#"<a href="guide">Guide</a>"#)
        .page("https://docs.example.com/guide", "<p>guide</p>")
        .raw_page(
            "https://example.com/feed",
            FakePage {
                status: 200,
                content_type: "application/rss+xml".to_string(),
                html: r#"<a href="https://feeds.example.com/">rss</a>"#.to_string(),
            },
        )
        .page("https://shop.example.com/cart", "<p>cart</p>")
        .unresolvable("https://gone.example.com/")
}

#[tokio::test]
async fn test_crawl_collects_hosts_across_failures() {
    let renderer = example_site();
    let mut session = renderer.open_session(&SessionOptions::default()).await.unwrap();

    let result = crawl("https://example.com/", &options(20), session.as_mut(), &quiet_site()).await;

    assert_eq!(
        result.subdomains,
        vec!["cdn.example.com", "docs.example.com", "gone.example.com", "shop.example.com"]
    );
    assert_eq!(result.external_domains, vec!["twitter.com", "www.googletagmanager.com"]);

    let navigations = renderer.navigations();
    assert!(!navigations.iter().any(|u| u.ends_with("logo.png")));
    assert!(navigations.contains(&"https://example.com/missing-page".to_string()));
    assert_eq!(result.pages_visited, navigations.len());
}

#[tokio::test]
async fn test_links_resolve_against_redirect_target() {
    let renderer = example_site();
    let mut session = renderer.open_session(&SessionOptions::default()).await.unwrap();

    crawl("https://example.com/", &options(20), session.as_mut(), &quiet_site()).await;

    let navigations = renderer.navigations();
    assert!(navigations.contains(&"https://docs.example.com/guide".to_string()));
    assert!(!navigations.contains(&"https://example.com/guide".to_string()));
}

#[tokio::test]
async fn test_non_html_pages_contribute_no_links() {
    let renderer = example_site();
    let mut session = renderer.open_session(&SessionOptions::default()).await.unwrap();

    let result = crawl("https://example.com/", &options(20), session.as_mut(), &quiet_site()).await;
    assert!(!result.subdomains.contains(&"feeds.example.com".to_string()));
}

#[tokio::test]
async fn test_presentation_variants_fetched_once() {
    let renderer = ScriptedRenderer::new()
        .page(
            "https://example.com/",
            r#"<a href="/r/rust?sort=new">new</a><a href="/r/rust?sort=top">top</a><a href="/r/rust?sort=hot&t=day">hot</a>"#,
        )
        .page("https://example.com/r/rust?sort=new", "<p>new</p>");
    let mut session = renderer.open_session(&SessionOptions::default()).await.unwrap();

    let result = crawl("https://example.com/", &options(10), session.as_mut(), &quiet_site()).await;

    let listing_fetches = renderer
        .navigations()
        .iter()
        .filter(|u| u.contains("/r/rust"))
        .count();
    assert_eq!(listing_fetches, 1);
    assert!(result.skipped_similar >= 2);
}

#[tokio::test]
async fn test_equivalent_urls_fetched_once() {
    let renderer = ScriptedRenderer::new()
        .page(
            "https://example.com",
            r#"<a href="/">Home</a><a href="https://www.example.com/About/">About</a>"#,
        )
        .page(
            "https://www.example.com/About/",
            r#"<a href="https://www.example.com/">Home</a><a href="/about">About</a>"#,
        );
    let mut session = renderer.open_session(&SessionOptions::default()).await.unwrap();

    let result = crawl("https://example.com", &options(10), session.as_mut(), &quiet_site()).await;

    let navigations = renderer.navigations();
    assert_eq!(navigations, vec!["https://example.com", "https://www.example.com/About/"]);
    let distinct: std::collections::HashSet<String> = navigations.iter().map(|u| normalize(u)).collect();
    assert_eq!(distinct.len(), navigations.len());
    assert_eq!(result.pages_visited, 2);
    assert_eq!(result.subdomains, vec!["www.example.com"]);
}

#[tokio::test]
async fn test_positional_strategy_never_fetches_fewer_pages() {
    let home = r#"<a href="/blog/post-1">1</a><a href="/blog/post-2">2</a><a href="/about-us">a</a><a href="/careers">c</a>"#;
    let site = |url: &str| -> ScriptedRenderer {
        ScriptedRenderer::new()
            .page(url, home)
            .page("https://example.com/blog/post-1", "<p>1</p>")
            .page("https://example.com/blog/post-2", "<p>2</p>")
            .page("https://example.com/about-us", "<p>a</p>")
            .page("https://example.com/careers", "<p>c</p>")
    };

    let edit = site("https://example.com/");
    let mut session = edit.open_session(&SessionOptions::default()).await.unwrap();
    let by_edit = crawl("https://example.com/", &options(10), session.as_mut(), &quiet_site()).await;

    let positional = site("https://example.com/");
    let mut session = positional.open_session(&SessionOptions::default()).await.unwrap();
    let opts = CrawlOptions {
        matcher: UrlMatcher::new(SimilarityStrategy::Positional, 0.8),
        ..options(10)
    };
    let by_position = crawl("https://example.com/", &opts, session.as_mut(), &quiet_site()).await;

    assert!(by_position.pages_visited >= by_edit.pages_visited);
}

#[tokio::test]
async fn test_unreachable_start_yields_empty_result() {
    let renderer = ScriptedRenderer::new().unresolvable("https://example.com/");
    let mut session = renderer.open_session(&SessionOptions::default()).await.unwrap();

    let result = crawl("https://example.com/", &options(10), session.as_mut(), &quiet_site()).await;
    assert_eq!(result.pages_visited, 1);
    assert!(result.subdomains.is_empty());
    assert!(result.external_domains.is_empty());
}

#[tokio::test]
async fn test_crawl_then_categorize() {
    let renderer = ScriptedRenderer::new().page(
        "https://www.reddit.com/",
        r#"<link href="https://www.redditstatic.com/shreddit.css">
           <img src="https://styles.redditmedia.com/t5/icon.png">
           <a href="https://redd.it/abc">short</a>
           <script src="https://www.google-analytics.com/ga.js"></script>
           <a href="https://old.reddit.com/">old</a>
           <a href="/r/rust">rust</a>"#,
    );
    let mut session = renderer.open_session(&SessionOptions::default()).await.unwrap();

    let result = crawl("https://www.reddit.com/", &options(1), session.as_mut(), &quiet_site()).await;
    let categories = categorize("reddit.com", &result.subdomains, &result.external_domains);

    assert_eq!(result.subdomains, vec!["old.reddit.com", "www.reddit.com"]);
    assert!(categories.related.contains(&"www.redditstatic.com".to_string()));
    assert!(categories.related.contains(&"styles.redditmedia.com".to_string()));
    assert!(categories.related.contains(&"redd.it".to_string()));
    assert!(categories.parents.contains(&"redditstatic.com".to_string()));
    assert!(categories.parents.contains(&"redditmedia.com".to_string()));
    assert_eq!(categories.third_party, vec!["www.google-analytics.com"]);
}
