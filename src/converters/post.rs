//! `app.bsky.feed.post` ↔ `Note` (spec §4.2).

use super::{ConversionEnv, Converter, InboundRecord, OutboundActivity, PendingBlob};
use crate::{
    error::Error,
    protocol::{
        activities::{Create, PersonAcceptedActivities},
        objects::{Attachment, Note},
    },
};
use activitystreams_kinds::object::NoteType;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use scraper::{Html, Node};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use url::Url;

/// Text is truncated to this many UTF-8 bytes with an ellipsis suffix (spec §4.2, §8).
const MAX_TEXT_BYTES: usize = 3000;

pub struct PostConverter;

/// The subset of `app.bsky.feed.post` this bridge round-trips.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct PostRecord {
    pub text: String,
    #[serde(default)]
    pub facets: Vec<Facet>,
    #[serde(default)]
    pub langs: Vec<String>,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub embed: Option<Value>,
    #[serde(default)]
    pub labels: Option<SelfLabels>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Facet {
    pub index: ByteSlice,
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ByteSlice {
    #[serde(rename = "byteStart")]
    pub byte_start: usize,
    #[serde(rename = "byteEnd")]
    pub byte_end: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct SelfLabels {
    #[serde(default)]
    pub values: Vec<SelfLabelValue>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SelfLabelValue {
    pub val: String,
}

/// The mapping from self-labels to AP `{sensitive, summary}` pairs (spec §4.2).
const LABEL_MAP: &[(&str, &str)] = &[
    ("sexual", "Sexual Content"),
    ("nudity", "Nudity"),
    ("graphic-media", "Graphic Media (Violence/Gore)"),
];

/// Renders `text`+`facets` as HTML. `is_local_mention` decides whether a mention facet's DID
/// resolves to a local actor URI (rendered as a link) or is dropped, leaving plain escaped text
/// (spec §4.2: "mentions resolve to a local actor URI when the referenced DID is local, dropped
/// otherwise"). Kept a pure, sync function — the locality check itself is an async PDS read the
/// caller resolves up front (see `to_activity_pub`), so this stays trivially testable.
pub(crate) fn render_html(
    text: &str,
    facets: &[Facet],
    local_hostname: &str,
    is_local_mention: &dyn Fn(&str) -> bool,
) -> String {
    // Sort facets by byte_start so the cursor walk below only ever moves forward.
    let mut facets = facets.to_vec();
    facets.sort_by_key(|f| f.index.byte_start);

    let bytes = text.as_bytes();
    let mut cursor = 0usize;
    let mut rendered = String::new();
    for facet in &facets {
        if facet.index.byte_start < cursor
            || facet.index.byte_end > bytes.len()
            || facet.index.byte_start > facet.index.byte_end
            || !text.is_char_boundary(facet.index.byte_start)
            || !text.is_char_boundary(facet.index.byte_end)
        {
            continue;
        }
        rendered.push_str(&escape_html(&text[cursor..facet.index.byte_start]));
        let anchor_text = &text[facet.index.byte_start..facet.index.byte_end];
        match facet.features.first() {
            Some(FacetFeature::Link { uri }) => {
                rendered.push_str(&format!(
                    r#"<a href="{}" rel="nofollow noopener">{}</a>"#,
                    escape_html(uri),
                    escape_html(anchor_text)
                ));
            }
            Some(FacetFeature::Mention { did }) if is_local_mention(did) => {
                let href = format!("https://{local_hostname}/users/{did}");
                rendered.push_str(&format!(
                    r#"<a href="{}" class="u-url mention">{}</a>"#,
                    escape_html(&href),
                    escape_html(anchor_text)
                ));
            }
            Some(FacetFeature::Mention { .. }) | None => rendered.push_str(&escape_html(anchor_text)),
        }
        cursor = facet.index.byte_end;
    }
    rendered.push_str(&escape_html(&text[cursor..]));

    rendered
        .split("\n\n")
        .map(|paragraph| format!("<p>{paragraph}</p>"))
        .collect::<Vec<_>>()
        .join("")
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// One parsed anchor: its visible text, href, and whether it should become a mention facet.
struct ParsedAnchor {
    text: String,
    href: String,
    is_mention: bool,
}

/// Walks parsed HTML, producing plain text (block elements become paragraph breaks) and the
/// anchors found along the way, in document order (spec §9).
fn html_to_plain_text_and_anchors(html: &str) -> (String, Vec<ParsedAnchor>) {
    let fragment = Html::parse_fragment(html);
    let mut plain_text = String::new();
    let mut anchors = Vec::new();
    walk_node(fragment.tree.root(), &mut plain_text, &mut anchors);
    (plain_text.trim().to_string(), anchors)
}

fn walk_node(
    node: ego_tree::NodeRef<Node>,
    plain_text: &mut String,
    anchors: &mut Vec<ParsedAnchor>,
) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => plain_text.push_str(text),
            Node::Element(element) => {
                let tag = element.name();
                if tag == "a" {
                    let start = plain_text.len();
                    walk_node(child, plain_text, anchors);
                    let anchor_text = plain_text[start..].to_string();
                    let href = element.attr("href").unwrap_or("").to_string();
                    let class = element.attr("class").unwrap_or("");
                    let is_mention = class.split_whitespace().any(|c| c == "mention");
                    anchors.push(ParsedAnchor {
                        text: anchor_text,
                        href,
                        is_mention,
                    });
                } else {
                    walk_node(child, plain_text, anchors);
                    if matches!(tag, "p" | "br" | "div") {
                        plain_text.push_str("\n\n");
                    }
                }
            }
            _ => {}
        }
    }
}

/// Locates each anchor's text inside `plain_text` using a cursor that only moves forward (spec
/// §9), producing facets with UTF-8 byte offsets.
fn anchors_to_facets(plain_text: &str, anchors: &[ParsedAnchor], local_hostname: &str) -> Vec<Facet> {
    let mut facets = Vec::new();
    let mut cursor = 0usize;
    for anchor in anchors {
        if anchor.text.is_empty() {
            continue;
        }
        let Some(relative_pos) = plain_text[cursor..].find(anchor.text.as_str()) else {
            continue;
        };
        let byte_start = cursor + relative_pos;
        let byte_end = byte_start + anchor.text.len();
        cursor = byte_end;

        let feature = if anchor.is_mention {
            match local_did_from_href(&anchor.href, local_hostname) {
                Some(did) => FacetFeature::Mention { did },
                None => continue,
            }
        } else {
            FacetFeature::Link {
                uri: anchor.href.clone(),
            }
        };
        facets.push(Facet {
            index: ByteSlice { byte_start, byte_end },
            features: vec![feature],
        });
    }
    facets
}

fn local_did_from_href(href: &str, local_hostname: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    if url.domain()? != local_hostname {
        return None;
    }
    let mut segments = url.path_segments()?;
    if segments.next()? != "users" {
        return None;
    }
    segments.next().map(|s| s.to_string())
}

fn truncate_to_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let suffix = "...";
    let budget = max_bytes.saturating_sub(suffix.len());
    let mut end = budget;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{suffix}", &text[..end])
}

fn summary_to_self_labels(sensitive: bool, summary: Option<&str>) -> Option<SelfLabels> {
    if !sensitive {
        return None;
    }
    let matched = summary.and_then(|s| {
        LABEL_MAP
            .iter()
            .find(|(_, label)| s.contains(label))
            .map(|(val, _)| *val)
    });
    let val = matched.unwrap_or("sexual");
    Some(SelfLabels {
        values: vec![SelfLabelValue { val: val.to_string() }],
    })
}

/// Up to 4 images, or exactly one video (spec §4.2), as PDS blob URLs.
const MAX_IMAGE_ATTACHMENTS: usize = 4;

/// Resolves `post.embed` into outbound `Document` attachments, pointing at this PDS's
/// `getBlob` endpoint rather than re-hosting media (spec §4.2).
fn embed_to_attachments(embed: Option<&Value>, pds_base_url: &str, did: &str) -> Vec<Attachment> {
    let Some(embed) = embed else { return Vec::new() };
    match embed.get("$type").and_then(Value::as_str) {
        Some("app.bsky.embed.images") => embed
            .get("images")
            .and_then(Value::as_array)
            .map(|images| {
                images
                    .iter()
                    .take(MAX_IMAGE_ATTACHMENTS)
                    .filter_map(|image| {
                        blob_attachment(image.get("image")?, pds_base_url, did, image.get("alt").and_then(Value::as_str))
                    })
                    .collect()
            })
            .unwrap_or_default(),
        Some("app.bsky.embed.video") => embed
            .get("video")
            .and_then(|blob| blob_attachment(blob, pds_base_url, did, embed.get("alt").and_then(Value::as_str)))
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

fn blob_attachment(blob: &Value, pds_base_url: &str, did: &str, alt: Option<&str>) -> Option<Attachment> {
    let cid = blob.pointer("/ref/$link").and_then(Value::as_str)?;
    let mime_type = blob
        .get("mimeType")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream");
    let url = Url::parse_with_params(
        &format!("{}/xrpc/com.atproto.sync.getBlob", pds_base_url.trim_end_matches('/')),
        &[("did", did), ("cid", cid)],
    )
    .ok()?;
    Some(Attachment {
        kind: "Document".to_string(),
        url,
        media_type: Some(mime_type.to_string()),
        name: alt.map(str::to_string),
    })
}

/// Downloads every AP attachment (subject to the size/scheme/network-range limits of spec §5)
/// so the caller can upload them as PDS blobs. Attachments beyond the first 4 images, or any
/// image attachments alongside a video, are dropped (spec §4.2: "up to 4 images OR one video").
async fn download_attachments(attachments: &[Attachment], env: &ConversionEnv<'_>) -> Vec<PendingBlob> {
    let video = attachments.iter().find(|a| is_video(a));
    let wanted: Vec<&Attachment> = match video {
        Some(video) => vec![video],
        None => attachments.iter().take(MAX_IMAGE_ATTACHMENTS).collect(),
    };
    let mut pending = Vec::with_capacity(wanted.len());
    for attachment in wanted {
        match download_attachment(attachment, env).await {
            Ok(blob) => pending.push(blob),
            Err(e) => warn!(url = %attachment.url, error = %e, "dropping undownloadable attachment"),
        }
    }
    pending
}

fn is_video(attachment: &Attachment) -> bool {
    attachment
        .media_type
        .as_deref()
        .is_some_and(|m| m.starts_with("video/"))
}

/// Maximum attachment size, matching the PDS blob limit (spec §5, §8).
const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

async fn download_attachment(attachment: &Attachment, env: &ConversionEnv<'_>) -> Result<PendingBlob, Error> {
    if !matches!(attachment.url.scheme(), "http" | "https") {
        return Err(Error::permanent("attachment url has disallowed scheme"));
    }
    if !env.allow_private_address && host_is_private(&attachment.url) {
        return Err(Error::permanent("attachment host is loopback/private"));
    }
    let response = env
        .pds
        .http_client()
        .get(attachment.url.clone())
        .send()
        .await
        .map_err(Error::from)?;
    if let Some(len) = response.content_length() {
        if len as usize > MAX_ATTACHMENT_BYTES {
            return Err(Error::permanent("attachment exceeds 10 MiB limit"));
        }
    }
    let bytes = response.bytes().await.map_err(Error::from)?;
    if bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(Error::permanent("attachment exceeds 10 MiB limit"));
    }
    Ok(PendingBlob {
        bytes: bytes.to_vec(),
        mime_type: attachment
            .media_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        alt: attachment.name.clone(),
        is_video: is_video(attachment),
    })
}

/// Loopback/private-range check (spec §5). Deliberately conservative: anything that doesn't
/// parse as a literal IP is treated as a public hostname, matching the teacher's own
/// localhost-only string check (`debug` flag in `config.rs`) generalized to real IP ranges.
fn host_is_private(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Ipv4(ip)) => ip.is_loopback() || ip.is_private() || ip.is_link_local(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback() || (ip.segments()[0] & 0xfe00) == 0xfc00,
        Some(url::Host::Domain(domain)) => domain == "localhost",
        None => true,
    }
}

/// Resolves which `Mention` facets' DIDs are local accounts, so `render_html` only links the
/// ones that are (spec §4.2).
pub(crate) async fn resolve_local_mentions(
    env: &ConversionEnv<'_>,
    facets: &[Facet],
) -> std::collections::HashSet<String> {
    let mut local = std::collections::HashSet::new();
    let mut checked = std::collections::HashSet::new();
    for facet in facets {
        for feature in &facet.features {
            if let FacetFeature::Mention { did } = feature {
                if !checked.insert(did.clone()) {
                    continue;
                }
                if super::is_local_did(env, did).await {
                    local.insert(did.clone());
                }
            }
        }
    }
    local
}

#[async_trait::async_trait]
impl Converter for PostConverter {
    async fn to_activity_pub(
        &self,
        at_uri: &str,
        record: &Value,
        env: &ConversionEnv<'_>,
    ) -> Result<Option<OutboundActivity>, Error> {
        let post: PostRecord = serde_json::from_value(record.clone())?;
        let did = at_uri_author(at_uri)?;
        let note_id = post_object_url(env.public_url, at_uri)?;
        let actor_id = actor_url(env.public_url, &did);

        let local_mentions = resolve_local_mentions(env, &post.facets).await;
        let content = render_html(&post.text, &post.facets, env.local_hostname, &|did| {
            local_mentions.contains(did)
        });
        let (sensitive, summary) = match &post.labels {
            Some(labels) => {
                let val = labels.values.first().map(|v| v.val.as_str());
                let mapped = val.and_then(|v| LABEL_MAP.iter().find(|(k, _)| *k == v));
                (true, mapped.map(|(_, label)| label.to_string()))
            }
            None => (false, None),
        };
        let content_map = post.langs.first().map(|lang| {
            let mut map = serde_json::Map::new();
            map.insert(lang.clone(), Value::String(content.clone()));
            map
        });

        let in_reply_to = post.reply.as_ref().map(|reply| {
            // The real mapping (mapped remote note vs local object URL) is resolved by the
            // caller, which has Store access this pure converter deliberately does not.
            Url::parse(&reply.parent.uri).unwrap_or_else(|_| note_id.clone())
        });

        let note = Note {
            id: note_id.clone(),
            kind: NoteType::default(),
            attributed_to: actor_id.clone(),
            content,
            content_map,
            to: vec!["https://www.w3.org/ns/activitystreams#Public".to_string()],
            cc: vec![format!("{actor_id}/followers")],
            in_reply_to,
            attachment: embed_to_attachments(post.embed.as_ref(), env.pds.base_url(), &did),
            sensitive,
            summary,
            published: chrono::Utc::now(),
        };

        let create = Create {
            actor: crate::fetch::object_id::ObjectId::from(actor_id.clone()),
            object: note,
            kind: Default::default(),
            id: Url::parse(&format!("{note_id}/activity"))?,
            to: vec!["https://www.w3.org/ns/activitystreams#Public".to_string()],
            cc: vec![format!("{actor_id}/followers")],
        };
        Ok(Some(OutboundActivity::Object(PersonAcceptedActivities::Create(
            create,
        ))))
    }

    async fn to_record(
        &self,
        object: &Value,
        env: &ConversionEnv<'_>,
    ) -> Result<Option<InboundRecord>, Error> {
        let note: Note = serde_json::from_value(object.clone())?;
        let (plain_text, anchors) = html_to_plain_text_and_anchors(&note.content);
        let facets = anchors_to_facets(&plain_text, &anchors, env.local_hostname);
        let text = truncate_to_bytes(&plain_text, MAX_TEXT_BYTES);
        let labels = summary_to_self_labels(note.sensitive, note.summary.as_deref());
        let langs = note
            .content_map
            .as_ref()
            .and_then(|map| map.keys().next())
            .into_iter()
            .cloned()
            .collect();
        let pending_blobs = download_attachments(&note.attachment, env).await;

        let record = PostRecord {
            text,
            facets,
            langs,
            reply: None,
            embed: None,
            labels,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        Ok(Some(InboundRecord {
            collection: "app.bsky.feed.post",
            value: serde_json::to_value(record)?,
            pending_blobs,
        }))
    }
}

fn at_uri_author(at_uri: &str) -> Result<String, Error> {
    at_uri
        .strip_prefix("at://")
        .and_then(|rest| rest.split('/').next())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::permanent("malformed atUri"))
}

pub fn actor_url(public_url: &str, did: &str) -> Url {
    Url::parse(&format!("{public_url}/users/{did}")).expect("public_url + did forms a valid url")
}

pub fn post_object_url(public_url: &str, at_uri: &str) -> Result<Url, Error> {
    let encoded = utf8_percent_encode(at_uri, NON_ALPHANUMERIC).to_string();
    Url::parse(&format!("{public_url}/posts/{encoded}")).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_facet(start: usize, end: usize, uri: &str) -> Facet {
        Facet {
            index: ByteSlice {
                byte_start: start,
                byte_end: end,
            },
            features: vec![FacetFeature::Link { uri: uri.to_string() }],
        }
    }

    fn mention_facet(start: usize, end: usize, did: &str) -> Facet {
        Facet {
            index: ByteSlice {
                byte_start: start,
                byte_end: end,
            },
            features: vec![FacetFeature::Mention { did: did.to_string() }],
        }
    }

    #[test]
    fn render_html_splits_paragraphs_and_renders_links() {
        let text = "hello world\n\nsecond para";
        let facets = vec![link_facet(6, 11, "https://example.com")];
        let html = render_html(text, &facets, "bridge.example", &|_| false);
        assert_eq!(
            html,
            r#"<p>hello <a href="https://example.com" rel="nofollow noopener">world</a></p><p>second para</p>"#
        );
    }

    #[test]
    fn render_html_links_local_mentions_only() {
        let text = "hi @alice and @bob";
        let facets = vec![mention_facet(3, 9, "did:plc:alice"), mention_facet(14, 18, "did:plc:bob")];
        let html = render_html(text, &facets, "bridge.example", &|did| did == "did:plc:alice");
        assert!(html.contains(r#"<a href="https://bridge.example/users/did:plc:alice" class="u-url mention">@alice</a>"#));
        assert!(!html.contains("did:plc:bob"));
        assert!(html.contains("@bob"));
    }

    #[test]
    fn render_html_escapes_text_and_attributes() {
        let text = "<script>alert(1)</script>";
        let html = render_html(text, &[], "bridge.example", &|_| false);
        assert_eq!(html, "<p>&lt;script&gt;alert(1)&lt;/script&gt;</p>");
    }

    #[test]
    fn render_html_skips_out_of_order_or_out_of_range_facets() {
        let text = "short";
        let facets = vec![link_facet(2, 1, "https://example.com"), link_facet(0, 100, "https://example.com")];
        let html = render_html(text, &facets, "bridge.example", &|_| false);
        assert_eq!(html, "<p>short</p>");
    }

    #[test]
    fn html_to_plain_text_round_trips_paragraphs() {
        let (text, anchors) = html_to_plain_text_and_anchors("<p>hello</p><p>world</p>");
        assert_eq!(text, "hello\n\nworld");
        assert!(anchors.is_empty());
    }

    #[test]
    fn html_to_plain_text_extracts_link_and_mention_anchors() {
        let html = r#"<p>hi <a class="u-url mention" href="https://bridge.example/users/did:plc:alice">@alice</a> see <a href="https://example.com">this</a></p>"#;
        let (text, anchors) = html_to_plain_text_and_anchors(html);
        assert_eq!(text, "hi @alice see this");
        assert_eq!(anchors.len(), 2);
        assert!(anchors[0].is_mention);
        assert_eq!(anchors[0].href, "https://bridge.example/users/did:plc:alice");
        assert!(!anchors[1].is_mention);
        assert_eq!(anchors[1].href, "https://example.com");
    }

    #[test]
    fn anchors_to_facets_computes_utf8_byte_offsets() {
        // "caf\u{e9}" (café) is 5 bytes in UTF-8; the anchor starts after it.
        let html = r#"<p>café <a href="https://example.com">link</a></p>"#;
        let (text, anchors) = html_to_plain_text_and_anchors(html);
        let facets = anchors_to_facets(&text, &anchors, "bridge.example");
        assert_eq!(facets.len(), 1);
        let facet = &facets[0];
        assert_eq!(&text.as_bytes()[facet.index.byte_start..facet.index.byte_end], b"link");
    }

    #[test]
    fn anchors_to_facets_drops_mentions_to_non_local_hosts() {
        let html = r#"<a class="mention" href="https://elsewhere.example/users/did:plc:alice">@alice</a>"#;
        let (text, anchors) = html_to_plain_text_and_anchors(html);
        let facets = anchors_to_facets(&text, &anchors, "bridge.example");
        assert!(facets.is_empty());
    }

    #[test]
    fn anchors_to_facets_keeps_mentions_to_local_hosts() {
        let html = r#"<a class="mention" href="https://bridge.example/users/did:plc:alice">@alice</a>"#;
        let (text, anchors) = html_to_plain_text_and_anchors(html);
        let facets = anchors_to_facets(&text, &anchors, "bridge.example");
        assert_eq!(facets.len(), 1);
        assert!(matches!(&facets[0].features[0], FacetFeature::Mention { did } if did == "did:plc:alice"));
    }

    #[test]
    fn truncate_to_bytes_preserves_short_text() {
        assert_eq!(truncate_to_bytes("hello", 3000), "hello");
    }

    #[test]
    fn truncate_to_bytes_adds_ellipsis_and_stays_under_limit() {
        let long = "a".repeat(3100);
        let truncated = truncate_to_bytes(&long, 3000);
        assert!(truncated.len() <= 3000);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncate_to_bytes_respects_utf8_char_boundaries() {
        // Every "é" is 2 bytes; the 2997-byte budget (3000 minus the "..." suffix) lands
        // mid-character, which must back off to the nearest boundary instead of panicking on a
        // slice index.
        let text = "é".repeat(1600);
        let truncated = truncate_to_bytes(&text, 3000);
        assert!(truncated.len() <= 3000);
        assert!(truncated.is_char_boundary(truncated.len() - 3));
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn summary_to_self_labels_maps_known_labels() {
        let labels = summary_to_self_labels(true, Some("Graphic Media (Violence/Gore)"));
        assert_eq!(labels.unwrap().values[0].val, "graphic-media");
    }

    #[test]
    fn summary_to_self_labels_falls_back_to_sexual_when_unmatched() {
        let labels = summary_to_self_labels(true, None);
        assert_eq!(labels.unwrap().values[0].val, "sexual");
    }

    #[test]
    fn summary_to_self_labels_none_when_not_sensitive() {
        assert_eq!(summary_to_self_labels(false, Some("Nudity")), None);
    }

    #[test]
    fn embed_to_attachments_maps_up_to_four_images() {
        let embed = serde_json::json!({
            "$type": "app.bsky.embed.images",
            "images": (0..6).map(|i| serde_json::json!({
                "image": { "ref": { "$link": format!("cid{i}") }, "mimeType": "image/png", "size": 10 },
                "alt": format!("alt{i}"),
            })).collect::<Vec<_>>(),
        });
        let attachments = embed_to_attachments(Some(&embed), "https://pds.example", "did:plc:alice");
        assert_eq!(attachments.len(), 4);
        assert_eq!(attachments[0].media_type.as_deref(), Some("image/png"));
        assert!(attachments[0].url.as_str().contains("cid0"));
        assert!(attachments[0].url.as_str().contains("did:plc:alice"));
    }

    #[test]
    fn embed_to_attachments_maps_video() {
        let embed = serde_json::json!({
            "$type": "app.bsky.embed.video",
            "video": { "ref": { "$link": "cidv" }, "mimeType": "video/mp4" },
            "alt": "a clip", // alt lives on the embed for video, not the blob
        });
        let attachments = embed_to_attachments(Some(&embed), "https://pds.example", "did:plc:alice");
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].media_type.as_deref(), Some("video/mp4"));
        assert_eq!(attachments[0].name.as_deref(), Some("a clip"));
    }

    #[test]
    fn embed_to_attachments_none_for_missing_embed() {
        assert!(embed_to_attachments(None, "https://pds.example", "did:plc:alice").is_empty());
    }

    #[test]
    fn host_is_private_rejects_loopback_and_private_ranges() {
        assert!(host_is_private(&Url::parse("http://127.0.0.1/x").unwrap()));
        assert!(host_is_private(&Url::parse("http://10.0.0.5/x").unwrap()));
        assert!(host_is_private(&Url::parse("http://localhost/x").unwrap()));
        assert!(!host_is_private(&Url::parse("https://example.com/x").unwrap()));
    }
}
