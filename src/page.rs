use anyhow::{ensure, Context};
use log::warn;
use rand::Rng;
use serde_json::Value;
use time::{format_description, Date, OffsetDateTime};
use tokio::time::Duration;

use crate::client::ReqClient;
use crate::config::Config;

/// The authoritative local filter: a bulletin is kept iff its title
/// contains this substring. The upstream `title` query parameter is only a
/// coarse server-side pre-filter.
pub static TITLE_KEYWORD: &str = "发行公告";

const PAGE_SIZE: u32 = 25;

/// One filtered issuance-announcement bulletin.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub security_code: String,
    pub security_abbr: String,
    pub title: String,
    pub issue_date: Date,
    /// Absolute attachment URL; `None` when the bulletin carries no file.
    pub pdf_url: Option<String>,
    /// `security_abbr + "_" + title`. Single source of truth for both the
    /// dataset column and the on-disk attachment name.
    pub pdf_name: String,
}

impl Record {
    pub fn derive_pdf_name(security_abbr: &str, title: &str) -> String {
        format!("{}_{}", security_abbr, title)
    }
}

fn parse_issue_date(raw: &str) -> anyhow::Result<Date> {
    let day = raw.get(..10).context("date shorter than day precision")?;
    let format = format_description::parse("[year]-[month]-[day]")?;
    let ret = Date::parse(day, &format)?;
    Ok(ret)
}

/// Strips the `jsonCallbackNNNN(...)` wrapping: everything between the
/// first `(` and the last `)` is the JSON payload.
fn unwrap_jsonp(body: &str) -> anyhow::Result<&str> {
    let start = body.find('(').context("no opening paren in jsonp body")?;
    let end = body.rfind(')').context("no closing paren in jsonp body")?;
    ensure!(start < end, "malformed jsonp envelope");
    Ok(&body[start + 1..end])
}

/// Parses one page body into filtered records. Bulletins failing the title
/// filter are discarded; bulletins without a usable publish date are
/// dropped with a warning rather than failing the page.
pub fn records_from_envelope(body: &str, asset_host: &str) -> anyhow::Result<Vec<Record>> {
    let json_body: Value = serde_json::from_str(unwrap_jsonp(body)?)?;
    let items = json_body["pageHelp"]["data"]
        .as_array()
        .context("extract data array failed")?;
    let mut records = Vec::new();
    for item in items {
        let title = item["title"].as_str().unwrap_or("").trim();
        if !title.contains(TITLE_KEYWORD) {
            continue;
        }
        let issue_date = match item["sseDate"].as_str().map(parse_issue_date) {
            Some(Ok(date)) => date,
            _ => {
                warn!("dropping bulletin without usable sseDate: {}", title);
                continue;
            }
        };
        let relative = item["url"].as_str().unwrap_or("");
        let pdf_url = if relative.is_empty() {
            None
        } else {
            Some(format!("{}{}", asset_host, relative))
        };
        let security_abbr = item["securityAbbr"].as_str().unwrap_or("").to_owned();
        records.push(Record {
            security_code: item["securityCode"].as_str().unwrap_or("").to_owned(),
            pdf_name: Record::derive_pdf_name(&security_abbr, title),
            security_abbr,
            title: title.to_owned(),
            issue_date,
            pdf_url,
        });
    }
    Ok(records)
}

/// Seam between the driver and the upstream pagination protocol. The
/// production implementation is [`SsePageSource`]; tests inject fakes.
pub trait PageSource {
    /// Fetches and filters one page. `Err` means "this page attempt
    /// failed" and instructs the driver to skip it, not to abort the run.
    async fn fetch_page(&self, page: u32) -> anyhow::Result<Vec<Record>>;
}

/// Page source backed by the SSE bond bulletin query endpoint.
pub struct SsePageSource {
    client: ReqClient,
    cfg: Config,
}

impl SsePageSource {
    pub fn new(client: ReqClient, cfg: &Config) -> Self {
        SsePageSource {
            client,
            cfg: cfg.clone(),
        }
    }

    fn query_params(&self, page: u32) -> Vec<(&'static str, String)> {
        let callback = format!(
            "jsonCallback{}",
            rand::thread_rng().gen_range(10_000_000..100_000_000u64)
        );
        let millis = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).to_string();
        let page = page.to_string();
        vec![
            ("jsonCallBack", callback),
            ("isPagination", "true".to_owned()),
            ("pageHelp.pageSize", PAGE_SIZE.to_string()),
            ("pageHelp.cacheSize", "1".to_owned()),
            ("type", "inParams".to_owned()),
            ("sqlId", "BS_ZQ_GGLL".to_owned()),
            ("sseDate", self.cfg.date_begin.clone()),
            ("sseDateEnd", self.cfg.date_end.clone()),
            ("securityCode", String::new()),
            ("title", TITLE_KEYWORD.to_owned()),
            ("orgBulletinType", self.cfg.bulletin_type.clone()),
            ("bondType", self.cfg.bond_type.clone()),
            ("order", "sseDate|desc,securityCode|asc,bulletinId|asc".to_owned()),
            ("pageHelp.pageNo", page.clone()),
            ("pageHelp.beginPage", page.clone()),
            ("pageHelp.endPage", page),
            ("_", millis),
        ]
    }
}

impl PageSource for SsePageSource {
    async fn fetch_page(&self, page: u32) -> anyhow::Result<Vec<Record>> {
        let url = format!("{}/commonSoaQuery.do", self.cfg.query_host);
        let resp = self
            .client
            .get(
                &url,
                &self.query_params(page),
                None,
                Duration::from_secs(self.cfg.page_timeout_secs),
            )
            .await?;
        let body = resp.text().await?;
        records_from_envelope(&body, &self.cfg.asset_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    static ASSET_HOST: &str = "https://static.sse.com.cn";

    fn envelope(items: &str) -> String {
        format!(
            r#"jsonCallback73714022({{"isPagination":"true","jsonCallBack":"jsonCallback73714022","pageHelp":{{"beginPage":1,"cacheSize":1,"data":[{}],"pageCount":311,"pageNo":1,"pageSize":25,"total":7762}},"texts":null}})"#,
            items
        )
    }

    fn item(code: &str, abbr: &str, title: &str, date: &str, url: &str) -> String {
        format!(
            r#"{{"securityCode":"{}","securityAbbr":"{}","title":"{}","sseDate":"{}","url":"{}","bulletinId":"123"}}"#,
            code, abbr, title, date, url
        )
    }

    #[test]
    fn keeps_only_titles_containing_the_keyword() {
        let body = envelope(&[
            item("113685", "25国贸", "2024年发行公告", "2024-05-11 00:00:00", "/bond/a.pdf"),
            item("115001", "25能建", "发行公告（第一期）", "2024-05-12 00:00:00", "/bond/b.pdf"),
            item("115002", "25城投", "法律意见书", "2024-05-13 00:00:00", "/bond/c.pdf"),
        ]
        .join(","));
        let records = records_from_envelope(&body, ASSET_HOST).unwrap();
        let titles: Vec<_> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["2024年发行公告", "发行公告（第一期）"]);
    }

    #[test]
    fn derives_pdf_url_and_name() {
        let body = envelope(&item(
            "113685",
            "25国贸01",
            "25国贸01发行公告",
            "2024-05-11 09:30:00",
            "/bond/announce/2024/x1.pdf",
        ));
        let records = records_from_envelope(&body, ASSET_HOST).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(
            record.pdf_url.as_deref(),
            Some("https://static.sse.com.cn/bond/announce/2024/x1.pdf")
        );
        assert_eq!(record.pdf_name, "25国贸01_25国贸01发行公告");
        assert_eq!(record.issue_date, date!(2024 - 05 - 11));
    }

    #[test]
    fn missing_url_becomes_none() {
        let body = envelope(&item("113685", "25国贸01", "发行公告", "2024-05-11 09:30:00", ""));
        let records = records_from_envelope(&body, ASSET_HOST).unwrap();
        assert_eq!(records[0].pdf_url, None);
    }

    #[test]
    fn bad_date_drops_the_item_not_the_page() {
        let body = envelope(&[
            item("1", "甲", "发行公告", "nope", "/a.pdf"),
            item("2", "乙", "发行公告", "2024-01-02 00:00:00", "/b.pdf"),
        ]
        .join(","));
        let records = records_from_envelope(&body, ASSET_HOST).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].security_code, "2");
    }

    #[test]
    fn title_is_trimmed_before_filtering() {
        let body = envelope(&item("1", "甲", "  发行公告  ", "2024-01-02 00:00:00", ""));
        let records = records_from_envelope(&body, ASSET_HOST).unwrap();
        assert_eq!(records[0].title, "发行公告");
        assert_eq!(records[0].pdf_name, "甲_发行公告");
    }

    #[test]
    fn rejects_malformed_envelopes() {
        assert!(records_from_envelope("no parens at all", ASSET_HOST).is_err());
        assert!(records_from_envelope(")(", ASSET_HOST).is_err());
        assert!(records_from_envelope("cb(not json)", ASSET_HOST).is_err());
        assert!(records_from_envelope(r#"cb({"pageHelp":{}})"#, ASSET_HOST).is_err());
    }

    #[test]
    fn empty_page_parses_to_no_records() {
        let records = records_from_envelope(&envelope(""), ASSET_HOST).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn query_params_target_the_requested_page() {
        let cfg = Config::default();
        let client = ReqClient::new(0, &cfg.referer).unwrap();
        let source = SsePageSource::new(client, &cfg);
        let params = source.query_params(7);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("pageHelp.pageNo"), "7");
        assert_eq!(get("pageHelp.beginPage"), "7");
        assert_eq!(get("pageHelp.endPage"), "7");
        assert_eq!(get("sqlId"), "BS_ZQ_GGLL");
        assert_eq!(get("title"), TITLE_KEYWORD);
        assert!(get("jsonCallBack").starts_with("jsonCallback"));
    }
}
