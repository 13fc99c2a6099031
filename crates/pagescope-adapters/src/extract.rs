//! Field extractors over fetched HTML.
//!
//! Each extractor is independent and returns `Option`: a field that is not on
//! the page is an expected outcome, never an error.

use pagescope_core::{CommentData, EmployeeData, EmployeeKind, PostData};
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::CompanyProfile;

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(err) => {
            warn!(css, error = %err, "invalid selector");
            None
        }
    }
}

fn clean_text(el: ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<Vec<_>>().join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn first_text(scope: ElementRef<'_>, css: &str) -> Option<String> {
    let sel = selector(css)?;
    scope.select(&sel).find_map(clean_text)
}

fn first_attr(scope: ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css)?;
    scope
        .select(&sel)
        .find_map(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Text of the `<dd>` following the `<dt>` whose label contains `term`.
pub fn definition(scope: ElementRef<'_>, term: &str) -> Option<String> {
    let dt = selector("dt")?;
    scope
        .select(&dt)
        .find(|el| clean_text(*el).is_some_and(|t| t.contains(term)))
        .and_then(|el| {
            el.next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|sib| sib.value().name() == "dd")
        })
        .and_then(clean_text)
}

/// Parse a displayed count such as "35,420 followers", "1.2K" or "12K reactions".
pub fn parse_count(text: &str) -> Option<u64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == ',' || c == '.'))
        .unwrap_or(rest.len());
    let number = rest[..end].trim_end_matches([',', '.']);

    let mut tail = rest[end..].chars();
    let suffix = tail.next().map(|c| c.to_ascii_lowercase());
    let standalone = tail.next().map_or(true, |c| !c.is_alphabetic());
    let multiplier = match suffix {
        Some('k') if standalone => 1_000.0,
        Some('m') if standalone => 1_000_000.0,
        Some('b') if standalone => 1_000_000_000.0,
        _ => return number.replace([',', '.'], "").parse().ok(),
    };
    let value: f64 = number.replace(',', ".").parse().ok()?;
    Some((value * multiplier).round() as u64)
}

pub fn company_name(doc: &Html) -> Option<String> {
    first_text(doc.root_element(), "h1.org-top-card-summary__title")
}

pub fn tagline(doc: &Html) -> Option<String> {
    first_text(doc.root_element(), "p.org-top-card-summary__tagline")
}

pub fn followers(doc: &Html) -> Option<u64> {
    let sel = selector("div.org-top-card-summary-info-list__info-item")?;
    let items = doc.select(&sel).filter_map(clean_text).collect::<Vec<_>>();
    items
        .iter()
        .find(|t| t.to_lowercase().contains("follower"))
        .or(items.first())
        .and_then(|t| parse_count(t))
}

pub fn logo_url(doc: &Html) -> Option<String> {
    first_attr(doc.root_element(), "img.org-top-card-primary-content__logo", "src")
}

pub fn website(doc: &Html) -> Option<String> {
    first_attr(
        doc.root_element(),
        "a[data-tracking-control-name='about_website']",
        "href",
    )
    .or_else(|| definition(doc.root_element(), "Website"))
}

pub fn industry(doc: &Html) -> Option<String> {
    let sel = selector("div.org-page-details__definition-text")?;
    doc.select(&sel)
        .filter_map(clean_text)
        .find(|t| t.chars().count() < 100)
        .or_else(|| definition(doc.root_element(), "Industry"))
}

pub fn headcount(doc: &Html) -> Option<String> {
    definition(doc.root_element(), "Company size")
}

pub fn headquarters(doc: &Html) -> Option<String> {
    definition(doc.root_element(), "Headquarters")
}

pub fn founded_year(doc: &Html) -> Option<i32> {
    definition(doc.root_element(), "Founded")?.trim().parse().ok()
}

pub fn specialities(doc: &Html) -> Option<Vec<String>> {
    let text = definition(doc.root_element(), "Specialties")?;
    Some(
        text.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
    )
}

pub fn company_profile(doc: &Html, page_id: &str, url: &str) -> CompanyProfile {
    CompanyProfile {
        page_id: page_id.to_string(),
        url: Some(url.to_string()),
        name: company_name(doc),
        description: tagline(doc),
        followers_count: followers(doc),
        profile_image_url: logo_url(doc),
        website: website(doc),
        industry: industry(doc),
        headcount: headcount(doc),
        location: headquarters(doc),
        founded_year: founded_year(doc),
        specialities: specialities(doc).unwrap_or_default(),
    }
}

/// Post id from an activity URN or permalink, e.g. `urn:li:activity:7123`.
fn post_id_from_urn(value: &str) -> Option<String> {
    let start = value.find("urn:li:")?;
    let urn = &value[start..];
    let end = urn.find(['/', '?', '#']).unwrap_or(urn.len());
    urn[..end]
        .rsplit(':')
        .next()
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Stable id for posts that expose neither a URN nor a permalink.
pub fn fallback_post_id(page_id: &str, content: Option<&str>, index: usize) -> String {
    match content.filter(|c| !c.is_empty()) {
        Some(content) => {
            let mut hasher = Sha256::new();
            hasher.update(page_id.as_bytes());
            hasher.update(b"\n");
            hasher.update(content.as_bytes());
            let digest = hex::encode(hasher.finalize());
            format!("{page_id}-post-{}", &digest[..16])
        }
        None => format!("{page_id}-post-{index}"),
    }
}

fn post_from_element(el: ElementRef<'_>, page_id: &str, index: usize) -> PostData {
    let permalink = first_attr(el, "a[data-control-name='view_linkedin_post']", "href");
    let content = first_text(el, "div.feed-shared-update-v2__description");
    let linkedin_post_id = permalink
        .as_deref()
        .and_then(post_id_from_urn)
        .or_else(|| el.value().attr("data-urn").and_then(post_id_from_urn))
        .unwrap_or_else(|| fallback_post_id(page_id, content.as_deref(), index));

    PostData {
        page_id: page_id.to_string(),
        linkedin_post_id,
        content,
        permalink,
        posted_at: first_text(el, "span.feed-shared-actor__sub-description"),
        posted_at_ts: None,
        likes_count: first_text(el, "span.social-details-social-counts__reactions-count")
            .and_then(|t| parse_count(&t))
            .unwrap_or(0),
        comments_count: first_text(el, "button[aria-label*='comment']")
            .and_then(|t| parse_count(&t))
            .unwrap_or(0),
    }
}

pub fn posts(doc: &Html, page_id: &str, max_posts: usize) -> Vec<PostData> {
    let Some(sel) = selector("div.feed-shared-update-v2") else {
        return Vec::new();
    };
    doc.select(&sel)
        .take(max_posts)
        .enumerate()
        .map(|(idx, el)| post_from_element(el, page_id, idx))
        .collect()
}

pub fn employees(doc: &Html, page_id: &str, max_employees: usize) -> Vec<EmployeeData> {
    let Some(sel) = selector("li.org-people-profile-card__profile-card-spacing") else {
        return Vec::new();
    };
    doc.select(&sel)
        .take(max_employees)
        .enumerate()
        .filter_map(|(idx, el)| {
            let Some(full_name) = first_text(el, "div.org-people-profile-card__profile-title")
            else {
                debug!(page_id, idx, "skipping profile card without a name");
                return None;
            };
            Some(EmployeeData {
                page_id: page_id.to_string(),
                full_name,
                profile_url: first_attr(
                    el,
                    "a[data-control-name='people_profile_card_name_link']",
                    "href",
                ),
                headline: first_text(el, "div.artdeco-entity-lockup__subtitle"),
                location: first_text(el, "div.artdeco-entity-lockup__caption"),
                kind: EmployeeKind::Employee,
            })
        })
        .collect()
}

pub fn comments(doc: &Html, post_id: &str, max_comments: usize) -> Vec<CommentData> {
    let Some(sel) = selector("article.comments-comment-item") else {
        return Vec::new();
    };
    doc.select(&sel)
        .take(max_comments)
        .map(|el| CommentData {
            post_id: post_id.to_string(),
            author_name: first_text(el, "span.comments-post-meta__name-text"),
            text: first_text(el, "span.comments-comment-item__main-content"),
            created_at: first_text(el, "span.comments-comment-item__timestamp"),
        })
        .collect()
}

/// Post id for a comment page URL, matching how posts are keyed.
pub fn post_id_from_url(post_url: &str) -> String {
    post_id_from_urn(post_url).unwrap_or_else(|| {
        let end = post_url.find(['?', '#']).unwrap_or(post_url.len());
        post_url[..end].trim_end_matches('/').to_string()
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub action: Option<String>,
    pub fields: Vec<(String, String)>,
}

/// Locate the sign-in form and fill in the credentials, keeping hidden fields
/// (CSRF tokens and the like) as served.
pub fn login_form(doc: &Html, email: &str, password: &str) -> Option<LoginForm> {
    let form_sel = selector("form")?;
    let input_sel = selector("input[name]")?;
    let form = doc.select(&form_sel).find(|f| {
        f.select(&input_sel)
            .any(|i| i.value().attr("type") == Some("password"))
    })?;

    let fields = form
        .select(&input_sel)
        .filter_map(|input| {
            let attrs = input.value();
            let name = attrs.attr("name")?.to_string();
            let value = if attrs.attr("type") == Some("password") {
                password.to_string()
            } else if attrs.attr("id") == Some("username") || attrs.attr("type") == Some("email") {
                email.to_string()
            } else {
                attrs.attr("value").unwrap_or_default().to_string()
            };
            Some((name, value))
        })
        .collect();

    Some(LoginForm {
        action: form.value().attr("action").map(ToString::to_string),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPANY_HTML: &str = r#"
        <html><body>
          <img class="org-top-card-primary-content__logo" src="https://cdn.example/acme.png">
          <h1 class="org-top-card-summary__title">  Acme   Robotics </h1>
          <p class="org-top-card-summary__tagline">Robots for everyone</p>
          <div class="org-top-card-summary-info-list__info-item">Industrial Automation</div>
          <div class="org-top-card-summary-info-list__info-item">35,420 followers</div>
          <a data-tracking-control-name="about_website" href="https://acme.example">acme.example</a>
          <div class="org-page-details__definition-text">Industrial Machinery Manufacturing</div>
          <dl>
            <dt>Company size</dt><dd>51-200 employees</dd>
            <dt>Headquarters</dt><dd>Pune, Maharashtra</dd>
            <dt>Founded</dt><dd> 2016 </dd>
            <dt>Specialties</dt><dd>robotics, automation, , AI</dd>
          </dl>
        </body></html>
    "#;

    const POSTS_HTML: &str = r#"
        <div class="feed-shared-update-v2" data-urn="urn:li:activity:7001">
          <a data-control-name="view_linkedin_post" href="https://site.example/feed/update/urn:li:activity:7001/">link</a>
          <div class="feed-shared-update-v2__description">We shipped v2!</div>
          <span class="feed-shared-actor__sub-description">3d •</span>
          <span class="social-details-social-counts__reactions-count">1,204</span>
          <button aria-label="12 comments on post">12 comments</button>
        </div>
        <div class="feed-shared-update-v2" data-urn="urn:li:activity:7002">
          <div class="feed-shared-update-v2__description">Hiring!</div>
        </div>
        <div class="feed-shared-update-v2">
          <div class="feed-shared-update-v2__description">No urn here</div>
        </div>
        <div class="feed-shared-update-v2"></div>
    "#;

    #[test]
    fn company_fields_are_extracted_independently() {
        let doc = Html::parse_document(COMPANY_HTML);
        let profile = company_profile(&doc, "acme", "https://site.example/company/acme/");
        assert_eq!(profile.name.as_deref(), Some("Acme Robotics"));
        assert_eq!(profile.description.as_deref(), Some("Robots for everyone"));
        assert_eq!(profile.followers_count, Some(35_420));
        assert_eq!(profile.profile_image_url.as_deref(), Some("https://cdn.example/acme.png"));
        assert_eq!(profile.website.as_deref(), Some("https://acme.example"));
        assert_eq!(profile.industry.as_deref(), Some("Industrial Machinery Manufacturing"));
        assert_eq!(profile.headcount.as_deref(), Some("51-200 employees"));
        assert_eq!(profile.location.as_deref(), Some("Pune, Maharashtra"));
        assert_eq!(profile.founded_year, Some(2016));
        assert_eq!(profile.specialities, vec!["robotics", "automation", "AI"]);
    }

    #[test]
    fn missing_fields_are_none_not_errors() {
        let doc = Html::parse_document("<html><body><h1>Sign in</h1></body></html>");
        let profile = company_profile(&doc, "ghost", "https://site.example/company/ghost/");
        assert_eq!(profile.name, None);
        assert_eq!(profile.followers_count, None);
        assert!(profile.specialities.is_empty());
        assert_eq!(profile.url.as_deref(), Some("https://site.example/company/ghost/"));
    }

    #[test]
    fn counts_accept_separators_and_suffixes() {
        assert_eq!(parse_count("35,420 followers"), Some(35_420));
        assert_eq!(parse_count("1.2K followers"), Some(1_200));
        assert_eq!(parse_count("12K"), Some(12_000));
        assert_eq!(parse_count("3M followers"), Some(3_000_000));
        assert_eq!(parse_count("12 members"), Some(12));
        assert_eq!(parse_count("no digits"), None);
    }

    #[test]
    fn posts_are_bounded_and_keyed() {
        let doc = Html::parse_document(POSTS_HTML);
        let all = posts(&doc, "acme", 15);
        assert_eq!(all.len(), 4);

        assert_eq!(all[0].linkedin_post_id, "7001");
        assert_eq!(all[0].content.as_deref(), Some("We shipped v2!"));
        assert_eq!(all[0].posted_at.as_deref(), Some("3d •"));
        assert_eq!(all[0].likes_count, 1_204);
        assert_eq!(all[0].comments_count, 12);

        assert_eq!(all[1].linkedin_post_id, "7002");
        assert_eq!(all[1].permalink, None);
        assert_eq!(all[1].likes_count, 0);

        assert!(all[2].linkedin_post_id.starts_with("acme-post-"));
        assert_eq!(all[2].linkedin_post_id.len(), "acme-post-".len() + 16);
        assert_eq!(all[3].linkedin_post_id, "acme-post-3");

        assert_eq!(posts(&doc, "acme", 2).len(), 2);
    }

    #[test]
    fn fallback_post_ids_are_stable_across_runs() {
        let a = fallback_post_id("acme", Some("hello"), 0);
        let b = fallback_post_id("acme", Some("hello"), 7);
        assert_eq!(a, b);
        assert_ne!(a, fallback_post_id("acme", Some("other"), 0));
    }

    #[test]
    fn employee_cards_without_names_are_skipped() {
        let html = r#"
            <ul>
              <li class="org-people-profile-card__profile-card-spacing">
                <a data-control-name="people_profile_card_name_link" href="https://site.example/in/ada">
                  <div class="org-people-profile-card__profile-title">Ada Lovelace</div>
                </a>
                <div class="artdeco-entity-lockup__subtitle">Engineer</div>
                <div class="artdeco-entity-lockup__caption">London</div>
              </li>
              <li class="org-people-profile-card__profile-card-spacing">
                <div class="artdeco-entity-lockup__subtitle">LinkedIn Member</div>
              </li>
            </ul>
        "#;
        let doc = Html::parse_document(html);
        let found = employees(&doc, "acme", 50);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].full_name, "Ada Lovelace");
        assert_eq!(found[0].profile_url.as_deref(), Some("https://site.example/in/ada"));
        assert_eq!(found[0].headline.as_deref(), Some("Engineer"));
        assert_eq!(found[0].location.as_deref(), Some("London"));
        assert_eq!(found[0].kind, EmployeeKind::Employee);
    }

    #[test]
    fn comments_are_extracted_per_article() {
        let html = r#"
            <article class="comments-comment-item">
              <span class="comments-post-meta__name-text">Grace Hopper</span>
              <span class="comments-comment-item__main-content">Congrats!</span>
              <span class="comments-comment-item__timestamp">1d</span>
            </article>
            <article class="comments-comment-item"></article>
        "#;
        let doc = Html::parse_document(html);
        let found = comments(&doc, "7001", 50);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].author_name.as_deref(), Some("Grace Hopper"));
        assert_eq!(found[0].text.as_deref(), Some("Congrats!"));
        assert_eq!(found[0].post_id, "7001");
        assert_eq!(found[1].author_name, None);
    }

    #[test]
    fn post_ids_are_derived_from_urls() {
        assert_eq!(
            post_id_from_url("https://site.example/feed/update/urn:li:activity:7001/"),
            "7001"
        );
        assert_eq!(
            post_id_from_url("https://site.example/posts/acme_hello/"),
            "https://site.example/posts/acme_hello"
        );
    }

    #[test]
    fn tracking_params_do_not_leak_into_post_ids() {
        assert_eq!(
            post_id_from_url(
                "https://site.example/feed/update/urn:li:activity:7001/\
                 ?utm_source=share&utm_medium=member_desktop"
            ),
            "7001"
        );
        assert_eq!(
            post_id_from_url("https://site.example/feed/update/urn:li:activity:7001?trk=abc#c"),
            "7001"
        );
        assert_eq!(
            post_id_from_url("https://site.example/posts/acme_hello/?trk=abc"),
            "https://site.example/posts/acme_hello"
        );

        let html = r#"
            <div class="feed-shared-update-v2" data-urn="urn:li:activity:7001">
              <a data-control-name="view_linkedin_post"
                 href="https://site.example/feed/update/urn:li:activity:7001/?trk=abc">link</a>
              <div class="feed-shared-update-v2__description">Same post, share link</div>
            </div>
        "#;
        let found = posts(&Html::parse_document(html), "acme", 15);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].linkedin_post_id, "7001");
    }

    #[test]
    fn login_form_keeps_hidden_fields_and_fills_credentials() {
        let html = r#"
            <form class="search"><input name="q" type="text"></form>
            <form action="/checkpoint/lg/login-submit" method="post">
              <input name="loginCsrfParam" type="hidden" value="abc123">
              <input id="username" name="session_key" type="text">
              <input id="password" name="session_password" type="password">
              <button type="submit">Sign in</button>
            </form>
        "#;
        let doc = Html::parse_document(html);
        let form = login_form(&doc, "me@example.com", "hunter2").unwrap();
        assert_eq!(form.action.as_deref(), Some("/checkpoint/lg/login-submit"));
        assert_eq!(
            form.fields,
            vec![
                ("loginCsrfParam".to_string(), "abc123".to_string()),
                ("session_key".to_string(), "me@example.com".to_string()),
                ("session_password".to_string(), "hunter2".to_string()),
            ]
        );
        assert!(login_form(&Html::parse_document("<p>none</p>"), "a", "b").is_none());
    }
}
