//! Lazy, continuation-token-driven paged results.
//!
//! A service operation that returns one page of results hands the decoded
//! first page to [`PagedCollection::new`]. Further pages are fetched on
//! demand through the same [`PageableClient`], re-using the original
//! request's headers:
//!
//! ```text
//! first page ──► items[0..n)        token "t1"
//! next_page()  ──► items[n..n+m)    token "t2"
//! next_page()  ──► items[n+m..k)    token ""   (exhausted)
//! next_page()  ──► Ok(None)         no request made
//! ```
//!
//! Items accumulate; a page never revisits items already handed out.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::client::ClientResponse;
use crate::context::{ContextKey, PipelineContext};
use crate::error::{PipelineError, Result};
use crate::events::{emit, Event};
use crate::message::{HttpHeaders, HttpMethod, HttpRequest};
use crate::options::ClientOptions;
use crate::xml::XmlMap;

/// Where a page keeps its items and its continuation token.
///
/// Both paths are dot-separated and walk nested JSON objects. For XML
/// responses `xml_item_name` names the element wrapping each item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedCodingKeys {
    pub items: String,
    pub continuation_token: String,
    pub xml_item_name: Option<String>,
}

impl Default for PagedCodingKeys {
    fn default() -> Self {
        Self::new("items", "continuationToken")
    }
}

impl PagedCodingKeys {
    pub fn new(items: impl Into<String>, continuation_token: impl Into<String>) -> Self {
        Self {
            items: items.into(),
            continuation_token: continuation_token.into(),
            xml_item_name: None,
        }
    }

    pub fn with_xml_item_name(mut self, name: impl Into<String>) -> Self {
        self.xml_item_name = Some(name.into());
        self
    }

    /// The items array of a page, if the path leads to exactly one array.
    pub fn items_from<'v>(&self, page: &'v Value) -> Option<&'v [Value]> {
        let mut current = page;
        let mut found = None;
        for component in self.items.split('.') {
            match current.get(component)? {
                Value::Array(items) => {
                    if found.is_some() {
                        return None;
                    }
                    found = Some(items.as_slice());
                }
                object @ Value::Object(_) => current = object,
                _ => return None,
            }
        }
        found
    }

    /// The continuation token of a page, if the path leads to a string.
    pub fn token_from<'v>(&self, page: &'v Value) -> Option<&'v str> {
        let mut current = page;
        let mut found = None;
        for component in self.continuation_token.split('.') {
            match current.get(component)? {
                Value::String(token) => {
                    if found.is_some() {
                        return None;
                    }
                    found = Some(token.as_str());
                }
                object @ Value::Object(_) => current = object,
                _ => return None,
            }
        }
        found
    }
}

/// A client able to fetch follow-up pages.
///
/// # Object Safety
///
/// This trait is object-safe and can be used as `Arc<dyn PageableClient>`.
#[async_trait]
pub trait PageableClient: Send + Sync {
    /// Run `request` through the client's pipeline.
    async fn request(&self, request: HttpRequest, context: PipelineContext) -> Result<ClientResponse>;

    /// Resolve a URL template against the client's base URL.
    fn url(&self, template: &str, kwargs: &[(&str, &str)]) -> Result<Url>;

    fn options(&self) -> &ClientOptions;

    /// URL of the page identified by `token`.
    ///
    /// By default the token itself is the URL template. Services that pass
    /// the token as a query parameter override this.
    fn continuation_url(&self, request_url: &Url, token: &str) -> Result<Url> {
        let _ = request_url;
        self.url(token, &[])
    }
}

/// Items of a paged operation, fetched a page at a time.
pub struct PagedCollection<T, C: PageableClient + ?Sized> {
    client: Arc<C>,
    context: PipelineContext,
    request_url: Url,
    request_headers: HttpHeaders,
    coding_keys: PagedCodingKeys,
    items: Vec<T>,
    page_range: Range<usize>,
    continuation_token: Option<String>,
    cursor: usize,
}

fn no_data() -> PipelineError {
    PipelineError::Decode("Response data expected but not found".into())
}

impl<T, C> PagedCollection<T, C>
where
    T: DeserializeOwned + Clone + Send,
    C: PageableClient + ?Sized,
{
    /// Wrap the first page of a paged call.
    ///
    /// `request` is the call that produced `data`; its URL and headers seed
    /// every follow-up request. When `xml_map` is given, follow-up XML pages
    /// are decoded with it.
    pub fn new(
        client: Arc<C>,
        request: &HttpRequest,
        context: PipelineContext,
        data: Option<Value>,
        coding_keys: PagedCodingKeys,
        xml_map: Option<XmlMap>,
    ) -> Result<Self> {
        let data = data.ok_or_else(no_data)?;
        let context = match xml_map {
            Some(map) => context.add(ContextKey::XmlMap, map),
            None => context,
        };
        let mut collection = Self {
            client,
            context,
            request_url: request.url.clone(),
            request_headers: request.headers.clone(),
            coding_keys,
            items: Vec::new(),
            page_range: 0..0,
            continuation_token: None,
            cursor: 0,
        };
        collection.update(&data)?;
        Ok(collection)
    }

    /// Every item fetched so far.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Items of the most recently fetched page.
    pub fn page_items(&self) -> &[T] {
        &self.items[self.page_range.clone()]
    }

    /// Items fetched so far; the server may hold more.
    pub fn underestimated_count(&self) -> usize {
        self.items.len()
    }

    pub fn continuation_token(&self) -> Option<&str> {
        self.continuation_token.as_deref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.continuation_token.as_deref().map_or(true, str::is_empty)
    }

    /// Fetch the next page and return its items.
    ///
    /// Resolves with `None`, without making a request, once the collection
    /// is exhausted. A failed fetch leaves the items fetched so far intact.
    pub async fn next_page(&mut self) -> Result<Option<&[T]>> {
        let Some(token) = self.continuation_token.clone().filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        tracing::info!("Fetching next page with: {token}");
        let url = self.client.continuation_url(&self.request_url, &token)?;

        let token_in_context = self.context.cancellation_token().cloned();
        if let Some(cancellation) = &token_in_context {
            cancellation.reset();
        }
        let context = self
            .context
            .with_cancellation(token_in_context, self.client.options());

        let request =
            HttpRequest::from_url(HttpMethod::Get, url).with_headers(self.request_headers.clone());
        let response = self.client.request(request, context).await?;
        let data = response.value().ok_or_else(no_data)?;
        self.update(&data)?;
        self.cursor = 0;

        emit(
            &self.client.options().event_handler,
            Event::PageFetched {
                items: self.page_range.len(),
                has_more: !self.is_exhausted(),
            },
        );
        Ok(Some(self.page_items()))
    }

    /// The next item, fetching the next page once the current one is used up.
    pub async fn next_item(&mut self) -> Result<Option<T>> {
        if self.cursor >= self.page_range.len() {
            let fetched = self.next_page().await?.map(<[T]>::len);
            if fetched.unwrap_or(0) == 0 {
                return Ok(None);
            }
        }
        let item = self.items[self.page_range.start + self.cursor].clone();
        self.cursor += 1;
        Ok(Some(item))
    }

    /// Every remaining item as a stream, fetching pages as it goes.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures::stream::try_unfold(self, |mut collection| async move {
            let item = collection.next_item().await?;
            Ok::<_, PipelineError>(item.map(|item| (item, collection)))
        })
    }

    /// The current page followed by every remaining page, as a stream of
    /// item batches. Pages are fetched lazily as the stream is polled.
    pub fn into_page_stream(self) -> impl Stream<Item = Result<Vec<T>>> {
        futures::stream::try_unfold((self, true), |(mut collection, first)| async move {
            if first {
                let page = collection.page_items().to_vec();
                return Ok::<_, PipelineError>(Some((page, (collection, false))));
            }
            let page = collection.next_page().await?.map(<[T]>::to_vec);
            Ok::<_, PipelineError>(page.map(|page| (page, (collection, false))))
        })
    }

    fn update(&mut self, page: &Value) -> Result<()> {
        let items = self.coding_keys.items_from(page).ok_or_else(|| {
            PipelineError::Decode("Paged response expected but not found".into())
        })?;
        let new_items: Vec<T> = serde_json::from_value(Value::Array(items.to_vec()))?;
        self.continuation_token = self.coding_keys.token_from(page).map(str::to_string);

        let prior = self.items.len();
        self.items.extend(new_items);
        self.page_range = prior..self.items.len();
        Ok(())
    }
}

impl<T, C: PageableClient + ?Sized> std::fmt::Debug for PagedCollection<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedCollection")
            .field("request_url", &self.request_url.as_str())
            .field("items", &self.items.len())
            .field("page_range", &self.page_range)
            .field("continuation_token", &self.continuation_token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffConfig;
    use crate::cancellation::CancellationToken;
    use crate::client::PipelineClient;
    use crate::events::RecordingEventHandler;
    use crate::message::{header, HttpResponse};
    use crate::transport::MockTransport;
    use crate::xml::{XmlMetadata, XmlModel, XmlModelType};
    use futures::TryStreamExt;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    fn page(items: &[&str], token: &str) -> HttpResponse {
        HttpResponse::new(200)
            .with_header(header::CONTENT_TYPE, "application/json")
            .with_body(json!({"items": items, "continuationToken": token}).to_string())
    }

    fn client(mock: Arc<MockTransport>, options: ClientOptions) -> Arc<PipelineClient> {
        Arc::new(
            PipelineClient::builder("https://h.test")
                .with_transport(mock)
                .with_options(options)
                .build()
                .unwrap(),
        )
    }

    fn first_request() -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, "https://h.test/api/things")
            .unwrap()
            .with_header("x-custom", "kept")
    }

    fn collection(
        client: Arc<PipelineClient>,
        first: Value,
    ) -> Result<PagedCollection<String, PipelineClient>> {
        PagedCollection::new(
            client,
            &first_request(),
            PipelineContext::new(),
            Some(first),
            PagedCodingKeys::default(),
            None,
        )
    }

    #[test]
    fn test_coding_key_paths() {
        let keys = PagedCodingKeys::new("EnumerationResults.Blobs", "EnumerationResults.NextMarker");
        let page = json!({"EnumerationResults": {"Blobs": [1, 2], "NextMarker": "m"}});
        assert_eq!(keys.items_from(&page).map(<[Value]>::len), Some(2));
        assert_eq!(keys.token_from(&page), Some("m"));

        let defaults = PagedCodingKeys::default();
        assert!(defaults.items_from(&page).is_none());
        assert!(defaults.token_from(&page).is_none());
    }

    #[tokio::test]
    async fn test_items_across_pages_exactly_once() {
        let mock = Arc::new(MockTransport::new(vec![
            page(&["c", "d"], "/api/things?page=3"),
            page(&["e"], ""),
        ]));
        let mut things = collection(
            client(mock.clone(), ClientOptions::default()),
            json!({"items": ["a", "b"], "continuationToken": "/api/things?page=2"}),
        )
        .unwrap();

        let mut seen = Vec::new();
        while let Some(item) = things.next_item().await.unwrap() {
            seen.push(item);
        }
        assert_eq!(seen, ["a", "b", "c", "d", "e"]);
        assert!(things.is_exhausted());
        assert_eq!(things.items(), ["a", "b", "c", "d", "e"]);
        assert_eq!(things.page_items(), ["e"]);

        assert!(things.next_item().await.unwrap().is_none());
        assert!(things.next_page().await.unwrap().is_none());

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url.as_str(), "https://h.test/api/things?page=2");
        assert_eq!(requests[1].url.as_str(), "https://h.test/api/things?page=3");
        assert_eq!(requests[0].headers.get("x-custom"), Some("kept"));
    }

    #[tokio::test]
    async fn test_next_page_ranges() {
        let mock = Arc::new(MockTransport::fixed(page(&["c", "d"], "")));
        let mut things = collection(
            client(mock, ClientOptions::default()),
            json!({"items": ["a"], "continuationToken": "next"}),
        )
        .unwrap();

        assert_eq!(things.page_items(), ["a"]);
        assert_eq!(things.next_page().await.unwrap().unwrap(), ["c", "d"]);
        assert_eq!(things.underestimated_count(), 3);
        assert!(things.continuation_token().is_some_and(str::is_empty));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_items() {
        let mock = Arc::new(MockTransport::fixed(HttpResponse::new(500)));
        let mut things = collection(
            client(mock, ClientOptions::default()),
            json!({"items": ["a"], "continuationToken": "next"}),
        )
        .unwrap();

        let err = things.next_page().await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(things.items(), ["a"]);
        assert_eq!(things.continuation_token(), Some("next"));
    }

    #[tokio::test]
    async fn test_missing_data_and_items() {
        let mock = Arc::new(MockTransport::fixed(HttpResponse::new(200)));
        let client = client(mock, ClientOptions::default());

        let err = PagedCollection::<String, _>::new(
            client.clone(),
            &first_request(),
            PipelineContext::new(),
            None,
            PagedCodingKeys::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));

        let err = collection(client, json!({"values": []})).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(ref m) if m.contains("Paged response")));
    }

    #[tokio::test]
    async fn test_into_stream_and_page_events() {
        let recorder = Arc::new(RecordingEventHandler::new());
        let mock = Arc::new(MockTransport::new(vec![page(&["b"], "p3"), page(&["c"], "")]));
        let things = collection(
            client(mock, ClientOptions::default().with_event_handler(recorder.clone())),
            json!({"items": ["a"], "continuationToken": "p2"}),
        )
        .unwrap();

        let all: Vec<String> = things.into_stream().try_collect().await.unwrap();
        assert_eq!(all, ["a", "b", "c"]);

        let pages: Vec<_> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::PageFetched { items, has_more } => Some((items, has_more)),
                _ => None,
            })
            .collect();
        assert_eq!(pages, [(1, true), (1, false)]);
    }

    #[tokio::test]
    async fn test_page_stream_yields_each_page_once() {
        let mock = Arc::new(MockTransport::new(vec![
            page(&["c", "d"], "p3"),
            page(&["e"], ""),
        ]));
        let things = collection(
            client(mock.clone(), ClientOptions::default()),
            json!({"items": ["a", "b"], "continuationToken": "p2"}),
        )
        .unwrap();

        let pages: Vec<Vec<String>> = things.into_page_stream().try_collect().await.unwrap();
        assert_eq!(pages, [vec!["a", "b"], vec!["c", "d"], vec!["e"]]);
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_page_stream_surfaces_fetch_errors() {
        let mock = Arc::new(MockTransport::fixed(HttpResponse::new(503)));
        let things = collection(
            client(mock, ClientOptions::default().with_retry(BackoffConfig::none())),
            json!({"items": ["a"], "continuationToken": "p2"}),
        )
        .unwrap();

        let mut pages = Box::pin(things.into_page_stream());
        assert_eq!(pages.try_next().await.unwrap(), Some(vec!["a".to_string()]));
        let err = pages.try_next().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_follow_up_rearms_cancellation() {
        let token = CancellationToken::with_timeout(Duration::from_secs(30));
        token.start();
        let mock = Arc::new(MockTransport::fixed(page(&["b"], "")));
        let mut things: PagedCollection<String, _> = PagedCollection::new(
            client(mock, ClientOptions::default()),
            &first_request(),
            PipelineContext::new().add(ContextKey::CancellationToken, token.clone()),
            Some(json!({"items": ["a"], "continuationToken": "p2"})),
            PagedCodingKeys::default(),
            None,
        )
        .unwrap();

        assert_eq!(things.next_page().await.unwrap().unwrap(), ["b"]);
        assert!(!token.is_cancelled());
    }

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct Thing {
        id: String,
        name: String,
    }

    impl XmlModel for Thing {
        fn xml_map() -> XmlMap {
            XmlMap::from([
                ("id", XmlMetadata::property("id")),
                ("name", XmlMetadata::property("name")),
            ])
        }
    }

    #[tokio::test]
    async fn test_xml_pages() {
        let keys = PagedCodingKeys::new("things.items", "things.next").with_xml_item_name("item");
        let map = XmlMap::paged(&keys, XmlModelType::of::<Thing>()).unwrap();
        let second = HttpResponse::new(200)
            .with_header(header::CONTENT_TYPE, "application/xml")
            .with_body(
                "<things><items><item><id>2</id><name>two</name></item></items><next/></things>",
            );
        let mock = Arc::new(MockTransport::fixed(second));
        let first = crate::xml::decode(
            b"<things><items><item><id>1</id><name>one</name></item></items><next>p2</next></things>",
            Some(&map),
        )
        .unwrap();

        let mut things: PagedCollection<Thing, _> = PagedCollection::new(
            client(mock, ClientOptions::default()),
            &first_request(),
            PipelineContext::new(),
            Some(first),
            keys,
            Some(map),
        )
        .unwrap();

        assert_eq!(things.next_item().await.unwrap().unwrap().name, "one");
        assert_eq!(
            things.next_item().await.unwrap(),
            Some(Thing { id: "2".into(), name: "two".into() })
        );
        assert!(things.is_exhausted());
        assert!(things.next_item().await.unwrap().is_none());
    }
}
