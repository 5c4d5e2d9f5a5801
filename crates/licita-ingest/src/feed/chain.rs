//! Following `previous-archive` links across feed documents

use super::parser::parse_feed;
use super::FeedEnvelope;
use crate::error::Result;
use crate::framework::{HttpClient, RateLimiter};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Why a chain walk stopped; none of these is an error for the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEnd {
    /// The last document had no previous-archive link
    EndOfChain,
    /// The iteration cap was reached
    MaxIterations,
    /// The link pointed at an already visited URL
    Cycle(String),
    /// A document could not be fetched or parsed
    Failed { url: String, error: String },
}

/// Documents collected by one walk, oldest first
#[derive(Debug, Clone)]
pub struct FollowedChain {
    pub feeds: Vec<FeedEnvelope>,
    /// URLs fetched, in fetch order (newest first)
    pub visited: Vec<String>,
    pub end: ChainEnd,
}

/// Resolve a possibly relative link against the document it came from
pub fn resolve_link(current: &str, link: &str) -> Result<String> {
    Ok(Url::parse(current)?.join(link)?.to_string())
}

/// Fetches are paced by the limiter shared with the rest of the source
pub struct ChainFollower {
    http: Arc<HttpClient>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl ChainFollower {
    pub fn new(http: Arc<HttpClient>, limiter: Arc<RateLimiter>) -> Self {
        let timeout = http.settings().feed_timeout();
        Self {
            http,
            limiter,
            timeout,
        }
    }

    /// Walk the chain starting at `start_url`
    ///
    /// At most `max_iterations` documents are fetched and no URL is fetched
    /// twice. The result is reversed so that it reads oldest first.
    pub async fn follow_chain(&self, start_url: &str, max_iterations: usize) -> FollowedChain {
        let mut feeds = Vec::new();
        let mut visited = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(start_url.to_string());
        let mut end = ChainEnd::EndOfChain;

        while let Some(url) = current.take() {
            if visited.len() >= max_iterations {
                info!(url = %start_url, max_iterations, "Chain iteration cap reached");
                end = ChainEnd::MaxIterations;
                break;
            }
            if !seen.insert(url.clone()) {
                warn!(url = %url, "Cycle detected in feed chain");
                end = ChainEnd::Cycle(url);
                break;
            }
            visited.push(url.clone());

            let feed = match self.fetch(&url).await {
                Ok(feed) => feed,
                Err(e) => {
                    error!(url = %url, error = %e, "Feed chain interrupted");
                    end = ChainEnd::Failed {
                        url,
                        error: e.to_string(),
                    };
                    break;
                },
            };

            current = match feed.next_archive_link.as_deref() {
                Some(link) => match resolve_link(&url, link) {
                    Ok(next) => Some(next),
                    Err(e) => {
                        error!(url = %url, link = %link, error = %e, "Unresolvable previous-archive link");
                        end = ChainEnd::Failed {
                            url: link.to_string(),
                            error: e.to_string(),
                        };
                        None
                    },
                },
                None => None,
            };
            debug!(url = %url, entries = feed.entries.len(), next = ?current, "Followed feed");
            feeds.push(feed);
        }

        feeds.reverse();
        info!(
            url = %start_url,
            documents = feeds.len(),
            end = ?end,
            "Feed chain collected"
        );

        FollowedChain {
            feeds,
            visited,
            end,
        }
    }

    async fn fetch(&self, url: &str) -> Result<FeedEnvelope> {
        self.limiter.acquire().await;
        let bytes = self.http.get_bytes_with_timeout(url, self.timeout).await?;
        parse_feed(&bytes, Some(url))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;
    use std::sync::Mutex;
    use std::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn feed_xml(id: &str, previous: Option<&str>) -> String {
        let link = previous
            .map(|p| format!(r#"<link rel="previous-archive" href="{}"/>"#, p))
            .unwrap_or_default();
        format!(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><id>{id}</id>{link}
               <entry><id>{id}-e</id><title>t</title><content>x</content></entry></feed>"#
        )
    }

    async fn serve(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn follower() -> ChainFollower {
        follower_paced(0.0)
    }

    fn follower_paced(requests_per_second: f64) -> ChainFollower {
        let http = HttpClient::new(HttpSettings {
            max_retries: 0,
            ..HttpSettings::default()
        })
        .unwrap();
        ChainFollower::new(Arc::new(http), Arc::new(RateLimiter::new(requests_per_second)))
    }

    /// Serves a chain document and records when it was requested
    struct Timed {
        body: String,
        arrivals: Arc<Mutex<Vec<Instant>>>,
    }

    impl Respond for Timed {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            self.arrivals.lock().unwrap().push(Instant::now());
            ResponseTemplate::new(200).set_body_string(self.body.clone())
        }
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(
            resolve_link("https://host.es/sindicacion/a/feed.atom", "feed_1.atom").unwrap(),
            "https://host.es/sindicacion/a/feed_1.atom"
        );
        assert_eq!(
            resolve_link("https://host.es/sindicacion/a/feed.atom", "/other/feed_1.atom").unwrap(),
            "https://host.es/other/feed_1.atom"
        );
        assert_eq!(
            resolve_link("https://host.es/a.atom", "https://mirror.es/b.atom").unwrap(),
            "https://mirror.es/b.atom"
        );
    }

    #[tokio::test]
    async fn test_follows_to_end_oldest_first() {
        let server = MockServer::start().await;
        serve(&server, "/feeds/c.atom", feed_xml("c", Some("b.atom"))).await;
        serve(&server, "/feeds/b.atom", feed_xml("b", Some("/feeds/a.atom"))).await;
        serve(&server, "/feeds/a.atom", feed_xml("a", None)).await;

        let chain = follower()
            .follow_chain(&format!("{}/feeds/c.atom", server.uri()), 10)
            .await;

        let ids: Vec<_> = chain.feeds.iter().map(|f| f.feed_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(chain.end, ChainEnd::EndOfChain);
        assert_eq!(chain.visited.len(), 3);
    }

    #[tokio::test]
    async fn test_stops_on_cycle() {
        let server = MockServer::start().await;
        serve(&server, "/b.atom", feed_xml("b", Some("a.atom"))).await;
        serve(&server, "/a.atom", feed_xml("a", Some("b.atom"))).await;

        let chain = follower()
            .follow_chain(&format!("{}/b.atom", server.uri()), 10)
            .await;

        assert_eq!(chain.feeds.len(), 2);
        assert!(matches!(chain.end, ChainEnd::Cycle(ref url) if url.ends_with("/b.atom")));
        let unique: HashSet<_> = chain.visited.iter().collect();
        assert_eq!(unique.len(), chain.visited.len());
    }

    #[tokio::test]
    async fn test_respects_iteration_cap() {
        let server = MockServer::start().await;
        for i in 0..6 {
            serve(
                &server,
                &format!("/f{}.atom", i),
                feed_xml(&format!("f{}", i), Some(&format!("f{}.atom", i + 1))),
            )
            .await;
        }

        let chain = follower()
            .follow_chain(&format!("{}/f0.atom", server.uri()), 3)
            .await;

        assert_eq!(chain.feeds.len(), 3);
        assert_eq!(chain.end, ChainEnd::MaxIterations);
        assert_eq!(chain.feeds[0].feed_id, "f2");
    }

    #[tokio::test]
    async fn test_failure_keeps_collected_documents() {
        let server = MockServer::start().await;
        serve(&server, "/new.atom", feed_xml("new", Some("gone.atom"))).await;

        let chain = follower()
            .follow_chain(&format!("{}/new.atom", server.uri()), 10)
            .await;

        assert_eq!(chain.feeds.len(), 1);
        assert!(matches!(chain.end, ChainEnd::Failed { ref url, .. } if url.ends_with("/gone.atom")));
    }

    #[tokio::test]
    async fn test_chain_requests_are_paced() {
        let server = MockServer::start().await;
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let previous = (i < 3).then(|| format!("p{}.atom", i + 1));
            Mock::given(method("GET"))
                .and(path(format!("/p{}.atom", i)))
                .respond_with(Timed {
                    body: feed_xml(&format!("p{}", i), previous.as_deref()),
                    arrivals: Arc::clone(&arrivals),
                })
                .mount(&server)
                .await;
        }

        // 20 requests per second: documents are fetched at least 50ms apart
        let chain = follower_paced(20.0)
            .follow_chain(&format!("{}/p0.atom", server.uri()), 10)
            .await;
        assert_eq!(chain.feeds.len(), 4);
        assert_eq!(chain.end, ChainEnd::EndOfChain);

        let seen = arrivals.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        for pair in seen.windows(2) {
            assert!(
                pair[1] - pair[0] >= Duration::from_millis(45),
                "fetches only {:?} apart",
                pair[1] - pair[0]
            );
        }
    }
}
