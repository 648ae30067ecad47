// backend/caldav.rs - CalDAV/Nextcloud over WebDAV (C2)
//
// Discovers calendar collections with `PROPFIND`, lists VTODO items with a
// calendar-query `REPORT`, and round-trips individual items as iCalendar
// VTODO text over plain `GET`/`PUT`/`DELETE`. ETags come from the
// `DAV:getetag` property returned on every multistatus response, which is
// exactly the optimistic-concurrency token spec §4.4 assumes.
//
// This crate's import/export *codecs* (CSV/iCal conversion commands) are
// out of scope (spec.md §1); the small VTODO encoder/decoder here is wire
// protocol, not a codec - CalDAV simply has no other representation for a
// task on the wire.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::{Method, StatusCode};

use crate::backend::{unsupported, Capabilities, EtagOr, RemoteList, RemoteTask, TaskBackend};
use crate::{Error, Result};

pub struct CalDavBackend {
    backend_id: String,
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl CalDavBackend {
    pub fn new(backend_id: String, base_url: String, username: String, password: String, allow_http: bool, insecure_skip_verify: bool) -> Result<Self> {
        if !allow_http && base_url.starts_with("http://") {
            return Err(Error::Config(format!(
                "{backend_id}: plain http requires backends.{backend_id}.allow_http = true"
            )));
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()?;
        Ok(Self {
            backend_id,
            base_url,
            username,
            password,
            client,
        })
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn propfind_calendars(&self) -> Result<Vec<(String, String, String)>> {
        let body = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:" xmlns:cs="http://calendarserver.org/ns/">
  <d:prop>
    <d:displayname/>
    <d:getetag/>
    <cs:getctag/>
  </d:prop>
</d:propfind>"#;
        let resp = self
            .request(Method::from_bytes(b"PROPFIND").unwrap(), &self.base_url)
            .header("Depth", "1")
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await?;
        let text = resp.text().await?;
        parse_multistatus_calendars(&text)
    }

    fn collection_url(&self, list_uid: &str) -> String {
        format!("{}/{}/", self.base_url.trim_end_matches('/'), list_uid)
    }

    fn item_url(&self, list_uid: &str, uid: &str) -> String {
        format!("{}{}.ics", self.collection_url(list_uid), uid)
    }
}

#[async_trait]
impl TaskBackend for CalDavBackend {
    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    fn capabilities(&self) -> Capabilities {
        // Nextcloud supports calendar creation/deletion/sharing, but the
        // conservative default is to assume only what every CalDAV server
        // commonly offers; sharing/publishing vary enough by server that
        // claiming them unconditionally would produce silent failures.
        Capabilities {
            list_deletion: true,
            list_creation: true,
            sharing: false,
            publishing: false,
            subscriptions: false,
        }
    }

    async fn probe(&self) -> Result<()> {
        let resp = self
            .request(Method::from_bytes(b"PROPFIND").unwrap(), &self.base_url)
            .header("Depth", "0")
            .send()
            .await?;
        if resp.status().is_success() || resp.status() == StatusCode::MULTI_STATUS {
            Ok(())
        } else {
            Err(Error::Network(format!("caldav probe failed: {}", resp.status())))
        }
    }

    async fn get_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        let calendars = self.propfind_calendars().await?;
        Ok(calendars
            .into_iter()
            .map(|(uid, name, etag)| EtagOr::new(RemoteList { uid, name, color: None, description: None, deleted: false }, Some(etag), None))
            .collect())
    }

    async fn get_list(&self, uid: &str) -> Result<Option<EtagOr<RemoteList>>> {
        Ok(self.get_lists().await?.into_iter().find(|l| l.value.uid == uid))
    }

    async fn create_list(&self, list: &RemoteList) -> Result<EtagOr<RemoteList>> {
        if !self.capabilities().list_creation {
            return Err(unsupported("caldav: create_list"));
        }
        let url = self.collection_url(&list.uid);
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<c:mkcalendar xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:set>
    <d:prop>
      <d:displayname>{}</d:displayname>
    </d:prop>
  </d:set>
</c:mkcalendar>"#,
            xml_escape(&list.name)
        );
        self.request(Method::from_bytes(b"MKCALENDAR").unwrap(), &url)
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await?;
        Ok(EtagOr::new(list.clone(), None, None))
    }

    async fn update_list(&self, list: &RemoteList, _precondition_etag: Option<&str>) -> Result<EtagOr<RemoteList>> {
        let url = self.collection_url(&list.uid);
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propertyupdate xmlns:d="DAV:">
  <d:set><d:prop><d:displayname>{}</d:displayname></d:prop></d:set>
</d:propertyupdate>"#,
            xml_escape(&list.name)
        );
        self.request(Method::from_bytes(b"PROPPATCH").unwrap(), &url)
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await?;
        Ok(EtagOr::new(list.clone(), None, None))
    }

    async fn delete_list(&self, uid: &str) -> Result<()> {
        self.request(Method::DELETE, &self.collection_url(uid)).send().await?;
        Ok(())
    }

    async fn restore_list(&self, _uid: &str) -> Result<()> {
        Err(unsupported("caldav: restore_list (no server-side trash)"))
    }

    async fn purge_list(&self, uid: &str) -> Result<()> {
        self.delete_list(uid).await
    }

    async fn get_deleted_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        Ok(Vec::new())
    }

    async fn get_tasks(&self, list_uid: &str) -> Result<Vec<EtagOr<RemoteTask>>> {
        let body = r#"<?xml version="1.0" encoding="utf-8" ?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop><d:getetag/><c:calendar-data/></d:prop>
  <c:filter><c:comp-filter name="VCALENDAR"><c:comp-filter name="VTODO"/></c:comp-filter></c:filter>
</c:calendar-query>"#;
        let resp = self
            .request(Method::from_bytes(b"REPORT").unwrap(), &self.collection_url(list_uid))
            .header("Depth", "1")
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await?;
        let text = resp.text().await?;
        parse_multistatus_vtodos(&text, list_uid)
    }

    async fn get_task(&self, list_uid: &str, uid: &str) -> Result<Option<EtagOr<RemoteTask>>> {
        let resp = self.request(Method::GET, &self.item_url(list_uid, uid)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let etag = resp.headers().get("etag").and_then(|v| v.to_str().ok()).map(|s| s.to_string());
        let text = resp.text().await?;
        Ok(Some(EtagOr::new(vtodo_to_task(&text, list_uid)?, etag, None)))
    }

    async fn create_task(&self, task: &RemoteTask) -> Result<EtagOr<RemoteTask>> {
        let ics = task_to_vtodo(task);
        let resp = self
            .request(Method::PUT, &self.item_url(&task.list_uid, &task.uid))
            .header("Content-Type", "text/calendar; charset=utf-8")
            .header("If-None-Match", "*")
            .body(ics)
            .send()
            .await?;
        let etag = resp.headers().get("etag").and_then(|v| v.to_str().ok()).map(|s| s.to_string());
        Ok(EtagOr::new(task.clone(), etag, None))
    }

    async fn update_task(&self, task: &RemoteTask, precondition_etag: Option<&str>) -> Result<EtagOr<RemoteTask>> {
        let ics = task_to_vtodo(task);
        let mut req = self
            .request(Method::PUT, &self.item_url(&task.list_uid, &task.uid))
            .header("Content-Type", "text/calendar; charset=utf-8");
        if let Some(etag) = precondition_etag {
            req = req.header("If-Match", etag);
        }
        let resp = req.body(ics).send().await?;
        if resp.status() == StatusCode::PRECONDITION_FAILED {
            return Err(Error::Conflict(format!("caldav etag mismatch for {}", task.uid)));
        }
        let etag = resp.headers().get("etag").and_then(|v| v.to_str().ok()).map(|s| s.to_string());
        Ok(EtagOr::new(task.clone(), etag, None))
    }

    async fn delete_task(&self, list_uid: &str, uid: &str) -> Result<()> {
        self.request(Method::DELETE, &self.item_url(list_uid, uid)).send().await?;
        Ok(())
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Minimal multistatus walker for `PROPFIND` calendar discovery: collects
/// `(href-derived uid, displayname, etag)` triples.
fn parse_multistatus_calendars(xml: &str) -> Result<Vec<(String, String, String)>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut out = Vec::new();
    let (mut href, mut name, mut etag) = (String::new(), String::new(), String::new());
    let mut current_tag = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => current_tag = local_name(&e.name().as_ref().to_vec()),
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().to_string();
                match current_tag.as_str() {
                    "href" => href = text,
                    "displayname" => name = text,
                    "getetag" => etag = text,
                    _ => {}
                }
            }
            Ok(Event::End(e)) if local_name(&e.name().as_ref().to_vec()) == "response" => {
                if !href.is_empty() && !name.is_empty() {
                    let uid = href.trim_end_matches('/').rsplit('/').next().unwrap_or(&href).to_string();
                    out.push((uid, name.clone(), etag.clone()));
                }
                href.clear();
                name.clear();
                etag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Serialization(format!("caldav xml parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn parse_multistatus_vtodos(xml: &str, list_uid: &str) -> Result<Vec<EtagOr<RemoteTask>>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut out = Vec::new();
    let (mut etag, mut data) = (String::new(), String::new());
    let mut current_tag = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => current_tag = local_name(&e.name().as_ref().to_vec()),
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().to_string();
                match current_tag.as_str() {
                    "getetag" => etag = text,
                    "calendar-data" => data.push_str(&text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) if local_name(&e.name().as_ref().to_vec()) == "response" => {
                if !data.is_empty() {
                    if let Ok(task) = vtodo_to_task(&data, list_uid) {
                        out.push(EtagOr::new(task, Some(etag.clone()).filter(|s| !s.is_empty()), None));
                    }
                }
                etag.clear();
                data.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Serialization(format!("caldav xml parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

fn task_to_vtodo(task: &RemoteTask) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//todoat//todoat//EN".to_string(),
        "BEGIN:VTODO".to_string(),
        format!("UID:{}", task.uid),
        format!("SUMMARY:{}", escape_ics_text(&task.summary)),
        format!("STATUS:{}", map_status_to_ics(&task.status)),
        format!("PRIORITY:{}", task.priority),
        format!("LAST-MODIFIED:{}", format_ics_datetime(task.modified)),
    ];
    if let Some(desc) = &task.description {
        lines.push(format!("DESCRIPTION:{}", escape_ics_text(desc)));
    }
    if let Some(due) = task.due {
        lines.push(format!("DUE:{}", format_ics_datetime(due)));
    }
    if let Some(start) = task.start {
        lines.push(format!("DTSTART:{}", format_ics_datetime(start)));
    }
    if let Some(completed) = task.completed {
        lines.push(format!("COMPLETED:{}", format_ics_datetime(completed)));
    }
    if let Some(parent) = &task.parent_uid {
        lines.push(format!("RELATED-TO:{parent}"));
    }
    if !task.tags.is_empty() {
        lines.push(format!("CATEGORIES:{}", task.tags.join(",")));
    }
    lines.push("END:VTODO".to_string());
    lines.push("END:VCALENDAR".to_string());
    lines.join("\r\n")
}

fn vtodo_to_task(ics: &str, list_uid: &str) -> Result<RemoteTask> {
    let mut uid = String::new();
    let mut summary = String::new();
    let mut description = None;
    let mut status = "TODO".to_string();
    let mut priority = 0u8;
    let mut due = None;
    let mut start = None;
    let mut completed = None;
    let mut modified = Utc::now();
    let mut parent_uid = None;
    let mut tags = Vec::new();

    for line in ics.lines() {
        let line = line.trim_end_matches('\r');
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.split(';').next().unwrap_or(key);
        match key {
            "UID" => uid = value.to_string(),
            "SUMMARY" => summary = unescape_ics_text(value),
            "DESCRIPTION" => description = Some(unescape_ics_text(value)),
            "STATUS" => status = map_status_from_ics(value),
            "PRIORITY" => priority = value.parse().unwrap_or(0),
            "DUE" => due = parse_ics_datetime(value),
            "DTSTART" => start = parse_ics_datetime(value),
            "COMPLETED" => completed = parse_ics_datetime(value),
            "LAST-MODIFIED" => {
                if let Some(t) = parse_ics_datetime(value) {
                    modified = t;
                }
            }
            "RELATED-TO" => parent_uid = Some(value.to_string()),
            "CATEGORIES" => tags = value.split(',').map(|s| s.to_string()).collect(),
            _ => {}
        }
    }

    if uid.is_empty() {
        return Err(Error::Validation("vtodo missing UID".to_string()));
    }

    Ok(RemoteTask {
        uid,
        list_uid: list_uid.to_string(),
        summary,
        description,
        status,
        priority,
        due,
        start,
        completed,
        modified,
        parent_uid,
        tags,
        deleted: false,
    })
}

fn map_status_to_ics(status: &str) -> &'static str {
    match status {
        "DONE" => "COMPLETED",
        "CANCELLED" => "CANCELLED",
        "IN-PROGRESS" => "IN-PROCESS",
        _ => "NEEDS-ACTION",
    }
}

fn map_status_from_ics(status: &str) -> String {
    match status {
        "COMPLETED" => "DONE",
        "CANCELLED" => "CANCELLED",
        "IN-PROCESS" => "IN-PROGRESS",
        _ => "TODO",
    }
    .to_string()
}

fn escape_ics_text(s: &str) -> String {
    s.replace('\\', "\\\\").replace(',', "\\,").replace(';', "\\;").replace('\n', "\\n")
}

fn unescape_ics_text(s: &str) -> String {
    s.replace("\\n", "\n").replace("\\,", ",").replace("\\;", ";").replace("\\\\", "\\")
}

fn format_ics_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

fn parse_ics_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%SZ") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y%m%d") {
        return Some(Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtodo_roundtrip_preserves_core_fields() {
        let task = RemoteTask {
            uid: "abc-123".to_string(),
            list_uid: "work".to_string(),
            summary: "Buy milk".to_string(),
            description: Some("2%, not whole".to_string()),
            status: "DONE".to_string(),
            priority: 3,
            due: Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()),
            start: None,
            completed: Some(Utc.with_ymd_and_hms(2026, 2, 28, 10, 0, 0).unwrap()),
            modified: Utc.with_ymd_and_hms(2026, 2, 28, 10, 0, 0).unwrap(),
            parent_uid: None,
            tags: vec!["errands".to_string()],
            deleted: false,
        };
        let ics = task_to_vtodo(&task);
        let parsed = vtodo_to_task(&ics, "work").unwrap();
        assert_eq!(parsed.uid, task.uid);
        assert_eq!(parsed.summary, task.summary);
        assert_eq!(parsed.status, "DONE");
        assert_eq!(parsed.priority, 3);
        assert_eq!(parsed.tags, task.tags);
    }

    #[test]
    fn status_mapping_is_stable() {
        assert_eq!(map_status_to_ics("DONE"), "COMPLETED");
        assert_eq!(map_status_from_ics("COMPLETED"), "DONE");
        assert_eq!(map_status_from_ics("NEEDS-ACTION"), "TODO");
    }
}
