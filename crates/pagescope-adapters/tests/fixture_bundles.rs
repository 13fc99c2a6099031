use std::path::PathBuf;

use pagescope_adapters::{FixtureScraper, ProfileScraper, ScrapeError};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

async fn logged_in() -> FixtureScraper {
    let mut scraper = FixtureScraper::from_dir(fixtures_dir());
    scraper.login().await.unwrap();
    scraper
}

#[tokio::test]
async fn structured_bundle_loads_from_disk() {
    let mut scraper = logged_in().await;

    let profile = scraper.scrape_company("acme-robotics").await.unwrap();
    assert_eq!(profile.name.as_deref(), Some("Acme Robotics"));
    assert_eq!(profile.followers_count, Some(35_420));
    assert_eq!(profile.founded_year, Some(2016));

    let posts = scraper.scrape_posts("acme-robotics", 15).await.unwrap();
    assert_eq!(posts.len(), 15);
    assert!(posts.iter().all(|p| p.page_id == "acme-robotics"));

    let employees = scraper.scrape_employees("acme-robotics", 50).await.unwrap();
    assert_eq!(employees.len(), 50);

    let permalink = posts[0].permalink.clone().unwrap();
    let comments = scraper.scrape_comments(&permalink, 50).await.unwrap();
    assert_eq!(comments.len(), 2);
    assert!(comments.iter().all(|c| c.post_id == posts[0].linkedin_post_id));
}

#[tokio::test]
async fn html_bundle_runs_through_the_extractors() {
    let mut scraper = logged_in().await;

    let profile = scraper.scrape_company("globex").await.unwrap();
    assert_eq!(profile.name.as_deref(), Some("Globex Corporation"));
    assert_eq!(profile.followers_count, Some(1_200));
    assert_eq!(profile.website.as_deref(), Some("https://globex.example"));
    assert_eq!(profile.headcount.as_deref(), Some("11-50 employees"));
    assert_eq!(profile.specialities, vec!["freight", "warehousing"]);

    let posts = scraper.scrape_posts("globex", 15).await.unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].linkedin_post_id, "7300000000000000001");
    assert_eq!(posts[0].likes_count, 87);
    assert!(posts[1].linkedin_post_id.starts_with("globex-post-"));

    let employees = scraper.scrape_employees("globex", 50).await.unwrap();
    assert_eq!(employees.len(), 1);
    assert_eq!(employees[0].full_name, "Hank Scorpio");
}

#[tokio::test]
async fn missing_bundle_is_a_nameless_profile() {
    let mut scraper = logged_in().await;
    let profile = scraper.scrape_company("no-such-company").await.unwrap();
    assert!(profile.name.is_none());
    assert!(profile.into_page_data().is_none());
}

#[tokio::test]
async fn malformed_bundle_is_a_fixture_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

    let mut scraper = FixtureScraper::from_dir(dir.path());
    scraper.login().await.unwrap();
    let err = scraper.scrape_company("broken").await.unwrap_err();
    assert!(matches!(err, ScrapeError::Fixture(_)));
}
