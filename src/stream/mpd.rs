//! DASH→HLS translator.
//!
//! Parses the MPD, serves a synthesized HLS master playlist on a bare
//! request, and expands the SegmentTimeline of one representation into a
//! media playlist whose segment lines point at the decrypt endpoint.

use axum::http::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    proxy::{encode_header_params, RoutingClient},
    types::{StreamBody, StreamRequest, StreamResponse},
    urlutil, Error, Result,
};

/// Live sliding window: number of trailing segments kept.
const LIVE_WINDOW: usize = 20;

pub struct MpdHandler {
    client: Arc<RoutingClient>,
    base_url: String,
}

impl MpdHandler {
    pub fn new(client: Arc<RoutingClient>, base_url: String) -> Self {
        Self { client, base_url }
    }

    pub fn can_handle(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        lower.contains(".mpd") || lower.contains("/dash/") || lower.contains("manifest(format=mpd")
    }

    pub async fn handle_manifest(&self, req: &StreamRequest) -> Result<StreamResponse> {
        tracing::debug!(url = %req.url, rep_id = ?req.rep_id, "handling MPD manifest");

        let upstream = self.client.get(&req.url, &req.headers).await?;
        let status = upstream.status();
        if status != StatusCode::OK {
            return Ok(StreamResponse::status(status));
        }

        let body = upstream.text().await?;

        let mpd = match parse_mpd(&body) {
            Ok(mpd) => mpd,
            Err(err) => {
                // A degraded response is still useful: hand the player the
                // original document untouched.
                tracing::warn!(url = %req.url, %err, "MPD parse failed, passing through");
                let mut response = StreamResponse::manifest(body);
                response.content_type = Some("application/dash+xml".to_string());
                return Ok(response);
            }
        };

        let playlist = match &req.rep_id {
            Some(rep_id) => self.build_media_playlist(&mpd, rep_id, req),
            None => self.build_master_playlist(&mpd, req),
        };

        Ok(StreamResponse::manifest(playlist))
    }

    pub async fn handle_segment(&self, req: &StreamRequest) -> Result<StreamResponse> {
        tracing::debug!(url = %req.url, "handling MPD segment");

        let upstream = self.client.get(&req.url, &req.headers).await?;
        let status = upstream.status();
        let content_type = upstream.header("Content-Type").unwrap_or_else(|| {
            if req.url.ends_with(".m4s") {
                "video/iso.segment".to_string()
            } else {
                "application/octet-stream".to_string()
            }
        });

        Ok(StreamResponse {
            status,
            content_type: Some(content_type),
            headers: HashMap::new(),
            body: StreamBody::Upstream(upstream),
            redirect_url: None,
        })
    }

    /// Synthesize the HLS master playlist: every audio rep becomes an
    /// EXT-X-MEDIA entry, video reps are filtered to the top quality.
    fn build_master_playlist(&self, mpd: &Mpd, req: &StreamRequest) -> String {
        let mut lines = vec!["#EXTM3U".to_string(), "#EXT-X-VERSION:3".to_string()];

        let mut has_audio = false;
        for period in &mpd.periods {
            for set in &period.adaptation_sets {
                if !set.is_audio() {
                    continue;
                }
                for rep in &set.representations {
                    let media_url = self.build_media_playlist_url(req, &rep.id);
                    let lang = set.lang.as_deref().unwrap_or("und");
                    let default = if has_audio { "NO" } else { "YES" };
                    lines.push(format!(
                        "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"Audio {lang} ({bw})\",LANGUAGE=\"{lang}\",DEFAULT={default},AUTOSELECT=YES,URI=\"{media_url}\"",
                        bw = rep.bandwidth,
                    ));
                    has_audio = true;
                }
            }
        }

        let max_height = mpd
            .video_representations()
            .filter_map(|rep| rep.height)
            .max()
            .unwrap_or(0);

        for period in &mpd.periods {
            for set in &period.adaptation_sets {
                if !set.is_video() {
                    continue;
                }
                for rep in &set.representations {
                    // Top quality only.
                    if rep.height.unwrap_or(0) < max_height {
                        continue;
                    }

                    let mut inf = format!("#EXT-X-STREAM-INF:BANDWIDTH={}", rep.bandwidth);
                    if let (Some(w), Some(h)) = (rep.width, rep.height) {
                        if w > 0 && h > 0 {
                            inf.push_str(&format!(",RESOLUTION={w}x{h}"));
                        }
                    }
                    if let Some(fr) = rep.frame_rate.as_deref().filter(|s| !s.is_empty()) {
                        inf.push_str(&format!(",FRAME-RATE={fr}"));
                    }
                    if let Some(codecs) = rep.codecs.as_deref().filter(|s| !s.is_empty()) {
                        inf.push_str(&format!(",CODECS=\"{codecs}\""));
                    }
                    if has_audio {
                        inf.push_str(",AUDIO=\"audio\"");
                    }

                    lines.push(inf);
                    lines.push(self.build_media_playlist_url(req, &rep.id));
                }
            }
        }

        lines.join("\n")
    }

    /// Expand one representation's SegmentTimeline into an HLS media
    /// playlist. Unknown rep or missing template yields an error playlist
    /// (still HTTP 200).
    fn build_media_playlist(&self, mpd: &Mpd, rep_id: &str, req: &StreamRequest) -> String {
        let Some((set, rep)) = mpd.find_representation(rep_id) else {
            return "#EXTM3U\n#EXT-X-ERROR: Representation not found".to_string();
        };

        let Some(template) = rep.segment_template.as_ref().or(set.segment_template.as_ref())
        else {
            return "#EXTM3U\n#EXT-X-ERROR: No SegmentTemplate found".to_string();
        };

        let is_live = mpd
            .mpd_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("dynamic"));

        let mut lines = vec!["#EXTM3U".to_string(), "#EXT-X-VERSION:3".to_string()];
        if is_live {
            lines.push("#EXT-X-START:TIME-OFFSET=-30.0,PRECISE=NO".to_string());
        } else {
            lines.push("#EXT-X-TARGETDURATION:10".to_string());
            lines.push("#EXT-X-PLAYLIST-TYPE:VOD".to_string());
        }

        let timescale = parse_or(template.timescale.as_deref(), 1u64);
        let start_number = parse_or(template.start_number.as_deref(), 1i64);

        let base_url = self.effective_base_url(mpd, rep, &req.url);

        let mut segments =
            expand_timeline(template, rep_id, &rep.bandwidth, timescale, start_number);

        if is_live && segments.len() > LIVE_WINDOW {
            segments.drain(..segments.len() - LIVE_WINDOW);
        }

        if let Some(first) = segments.first() {
            if is_live {
                let max_duration = segments
                    .iter()
                    .map(|s| s.duration)
                    .fold(0.0f64, f64::max);
                let media_sequence = if first.duration_ts > 0 {
                    first.time / first.duration_ts as i64
                } else {
                    0
                };
                lines.push(format!(
                    "#EXT-X-TARGETDURATION:{}",
                    max_duration.ceil() as i64 + 1
                ));
                lines.push(format!("#EXT-X-MEDIA-SEQUENCE:{media_sequence}"));
            }
        }

        let init_url = template
            .initialization
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|init| {
                let path = replace_template_vars(init, rep_id, &rep.bandwidth, 0, 0);
                urlutil::resolve_url(&path, &base_url)
            });

        for segment in &segments {
            lines.push(format!("#EXTINF:{:.3},", segment.duration));
            let segment_url = urlutil::resolve_url(&segment.url, &base_url);
            // Every segment goes through the decrypt endpoint: it remuxes
            // fMP4 to TS even when no key is present, since player fMP4
            // support varies.
            lines.push(self.build_decrypt_url(&segment_url, init_url.as_deref(), req));
        }

        if !is_live {
            lines.push("#EXT-X-ENDLIST".to_string());
        }

        lines.join("\n")
    }

    /// MPD-level BaseURL wins; otherwise the directory of the request URL.
    /// A representation-level BaseURL refines the result.
    fn effective_base_url(&self, mpd: &Mpd, rep: &Representation, original_url: &str) -> String {
        let mut base = match mpd.base_urls.first().filter(|u| !u.is_empty()) {
            Some(url) => url.clone(),
            None => urlutil::base_directory(original_url),
        };
        if let Some(rep_base) = rep.base_url.as_deref().filter(|s| !s.is_empty()) {
            base = urlutil::resolve_url(rep_base, &base);
        }
        base
    }

    fn build_media_playlist_url(&self, req: &StreamRequest, rep_id: &str) -> String {
        let mut url = match url::Url::parse(&format!("{}/proxy/hls/manifest.m3u8", self.base_url))
        {
            Ok(url) => url,
            Err(_) => return String::new(),
        };
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("d", &req.url);
            query.append_pair("format", "hls");
            query.append_pair("rep_id", rep_id);
            for (key, value) in encode_header_params(&req.headers) {
                query.append_pair(&key, &value);
            }
            if let Some(clearkey) = req.clear_key.as_deref().filter(|s| !s.is_empty()) {
                query.append_pair("clearkey", clearkey);
            }
        }
        url.to_string()
    }

    fn build_decrypt_url(
        &self,
        segment_url: &str,
        init_url: Option<&str>,
        req: &StreamRequest,
    ) -> String {
        let mut url = match url::Url::parse(&format!("{}/decrypt/segment.ts", self.base_url)) {
            Ok(url) => url,
            Err(_) => return segment_url.to_string(),
        };
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", segment_url);
            if let Some(init) = init_url {
                query.append_pair("init_url", init);
            }
            for (key, value) in encode_header_params(&req.headers) {
                query.append_pair(&key, &value);
            }

            match parse_clearkey_pairs(req.clear_key.as_deref().unwrap_or_default()) {
                Some((kids, keys)) => {
                    query.append_pair("key_id", &kids);
                    query.append_pair("key", &keys);
                }
                None => {
                    // Sentinel: remux only, no decryption.
                    query.append_pair("key_id", "00000000000000000000000000000000");
                    query.append_pair("key", "00000000000000000000000000000000");
                    query.append_pair("skip_decrypt", "1");
                }
            }
        }
        url.to_string()
    }
}

/// Split `KID1:KEY1,KID2:KEY2` into comma-joined kid and key lists.
fn parse_clearkey_pairs(clearkey: &str) -> Option<(String, String)> {
    let mut kids = Vec::new();
    let mut keys = Vec::new();
    for pair in clearkey.split(',') {
        if let Some((kid, key)) = pair.split_once(':') {
            kids.push(kid.trim().to_string());
            keys.push(key.trim().to_string());
        }
    }
    if kids.is_empty() {
        return None;
    }
    Some((kids.join(","), keys.join(",")))
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub url: String,
    pub duration: f64,
    pub duration_ts: u64,
    pub time: i64,
    pub number: i64,
}

/// Walk the SegmentTimeline in order: `t` resets the clock, each entry emits
/// `r+1` segments, the clock advances by `d` per segment.
pub fn expand_timeline(
    template: &SegmentTemplate,
    rep_id: &str,
    bandwidth: &str,
    timescale: u64,
    start_number: i64,
) -> Vec<Segment> {
    let Some(timeline) = &template.segment_timeline else {
        return Vec::new();
    };
    let media = template.media.as_deref().unwrap_or_default();

    let mut segments = Vec::new();
    let mut current_time: i64 = 0;
    let mut number = start_number;

    for entry in &timeline.entries {
        if let Some(t) = entry.t.as_deref().and_then(|t| t.parse::<i64>().ok()) {
            current_time = t;
        }

        let d = parse_or(Some(entry.d.as_str()), 0u64);
        let r = parse_or(entry.r.as_deref(), 0u64);
        let duration = d as f64 / timescale.max(1) as f64;

        for _ in 0..=r {
            let url = replace_template_vars(media, rep_id, bandwidth, number, current_time);
            segments.push(Segment {
                url,
                duration,
                duration_ts: d,
                time: current_time,
                number,
            });
            current_time += d as i64;
            number += 1;
        }
    }

    segments
}

pub fn replace_template_vars(
    template: &str,
    rep_id: &str,
    bandwidth: &str,
    number: i64,
    time: i64,
) -> String {
    template
        .replace("$RepresentationID$", rep_id)
        .replace("$Bandwidth$", bandwidth)
        .replace("$Number$", &number.to_string())
        .replace("$Time$", &time.to_string())
}

fn parse_or<T: std::str::FromStr>(value: Option<&str>, default: T) -> T {
    value
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse an MPD document into the structured model.
pub fn parse_mpd(body: &str) -> Result<Mpd> {
    quick_xml::de::from_str(body).map_err(|e| Error::ManifestParse(e.to_string()))
}

// MPD document model

#[derive(Debug, Clone, Deserialize)]
pub struct Mpd {
    #[serde(rename = "@type")]
    pub mpd_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    pub base_urls: Vec<String>,
    #[serde(rename = "Period", default)]
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Period {
    #[serde(rename = "AdaptationSet", default)]
    pub adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdaptationSet {
    #[serde(rename = "@mimeType")]
    pub mime_type: Option<String>,
    #[serde(rename = "@contentType")]
    pub content_type: Option<String>,
    #[serde(rename = "@lang")]
    pub lang: Option<String>,
    #[serde(rename = "SegmentTemplate")]
    pub segment_template: Option<SegmentTemplate>,
    #[serde(rename = "Representation", default)]
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Representation {
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(rename = "@bandwidth", default)]
    pub bandwidth: String,
    #[serde(rename = "@width")]
    pub width: Option<u32>,
    #[serde(rename = "@height")]
    pub height: Option<u32>,
    #[serde(rename = "@frameRate")]
    pub frame_rate: Option<String>,
    #[serde(rename = "@codecs")]
    pub codecs: Option<String>,
    #[serde(rename = "BaseURL")]
    pub base_url: Option<String>,
    #[serde(rename = "SegmentTemplate")]
    pub segment_template: Option<SegmentTemplate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentTemplate {
    #[serde(rename = "@timescale")]
    pub timescale: Option<String>,
    #[serde(rename = "@initialization")]
    pub initialization: Option<String>,
    #[serde(rename = "@media")]
    pub media: Option<String>,
    #[serde(rename = "@startNumber")]
    pub start_number: Option<String>,
    #[serde(rename = "SegmentTimeline")]
    pub segment_timeline: Option<SegmentTimeline>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentTimeline {
    #[serde(rename = "S", default)]
    pub entries: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineEntry {
    #[serde(rename = "@t")]
    pub t: Option<String>,
    #[serde(rename = "@d", default)]
    pub d: String,
    #[serde(rename = "@r")]
    pub r: Option<String>,
}

impl Mpd {
    fn video_representations(&self) -> impl Iterator<Item = &Representation> {
        self.periods
            .iter()
            .flat_map(|p| &p.adaptation_sets)
            .filter(|set| set.is_video())
            .flat_map(|set| &set.representations)
    }

    fn find_representation(&self, rep_id: &str) -> Option<(&AdaptationSet, &Representation)> {
        for period in &self.periods {
            for set in &period.adaptation_sets {
                for rep in &set.representations {
                    if rep.id == rep_id {
                        return Some((set, rep));
                    }
                }
            }
        }
        None
    }
}

impl AdaptationSet {
    fn is_video(&self) -> bool {
        contains_kind(&self.mime_type, &self.content_type, "video")
    }

    fn is_audio(&self) -> bool {
        contains_kind(&self.mime_type, &self.content_type, "audio")
    }
}

fn contains_kind(mime_type: &Option<String>, content_type: &Option<String>, kind: &str) -> bool {
    mime_type.as_deref().is_some_and(|m| m.contains(kind))
        || content_type.as_deref().is_some_and(|c| c.contains(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::RoutingClient;

    fn handler() -> MpdHandler {
        MpdHandler::new(
            Arc::new(RoutingClient::new(Vec::new(), Vec::new())),
            "https://p".to_string(),
        )
    }

    const STATIC_MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static">
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate timescale="1000" initialization="init_$RepresentationID$.mp4" media="seg_$RepresentationID$_$Number$.m4s" startNumber="1">
        <SegmentTimeline>
          <S t="0" d="4000" r="2"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v1" bandwidth="2000000" width="1280" height="720"/>
      <Representation id="v2" bandwidth="5000000" width="1920" height="1080"/>
    </AdaptationSet>
    <AdaptationSet mimeType="audio/mp4" lang="en">
      <SegmentTemplate timescale="1000" initialization="init_$RepresentationID$.mp4" media="seg_$RepresentationID$_$Number$.m4s" startNumber="1">
        <SegmentTimeline>
          <S t="0" d="4000" r="2"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="a1" bandwidth="128000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn test_can_handle() {
        let h = handler();
        assert!(h.can_handle("https://x/stream.mpd"));
        assert!(h.can_handle("https://x/dash/stream"));
        assert!(h.can_handle("https://x/manifest(format=mpd-time-csf)"));
        assert!(!h.can_handle("https://x/master.m3u8"));
    }

    #[test]
    fn test_parse_mpd() {
        let mpd = parse_mpd(STATIC_MPD).unwrap();
        assert_eq!(mpd.mpd_type.as_deref(), Some("static"));
        assert_eq!(mpd.periods.len(), 1);
        assert_eq!(mpd.periods[0].adaptation_sets.len(), 2);
        let video = &mpd.periods[0].adaptation_sets[0];
        assert!(video.is_video());
        assert_eq!(video.representations[1].height, Some(1080));
        let st = video.segment_template.as_ref().unwrap();
        assert_eq!(st.timescale.as_deref(), Some("1000"));
        assert_eq!(st.segment_timeline.as_ref().unwrap().entries.len(), 1);
    }

    #[test]
    fn test_parse_mpd_malformed() {
        assert!(parse_mpd("not xml at all <<<").is_err());
    }

    #[test]
    fn test_replace_template_vars() {
        assert_eq!(
            replace_template_vars("seg_$RepresentationID$_$Number$_$Time$_$Bandwidth$.m4s", "v1", "500", 7, 2800),
            "seg_v1_7_2800_500.m4s"
        );
    }

    #[test]
    fn test_expand_timeline_repeat_count() {
        let template = SegmentTemplate {
            timescale: Some("1000".to_string()),
            initialization: None,
            media: Some("seg_$Number$_$Time$.m4s".to_string()),
            start_number: Some("1".to_string()),
            segment_timeline: Some(SegmentTimeline {
                entries: vec![TimelineEntry {
                    t: Some("0".to_string()),
                    d: "4000".to_string(),
                    r: Some("2".to_string()),
                }],
            }),
        };

        let segments = expand_timeline(&template, "v1", "100", 1000, 1);
        // r=2 means 3 segments total
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].time, 0);
        assert_eq!(segments[1].time, 4000);
        assert_eq!(segments[2].time, 8000);
        assert_eq!(segments[0].number, 1);
        assert_eq!(segments[2].number, 3);
        assert!((segments[0].duration - 4.0).abs() < 1e-9);
        assert_eq!(segments[0].url, "seg_1_0.m4s");
        assert_eq!(segments[2].url, "seg_3_8000.m4s");
    }

    #[test]
    fn test_expand_timeline_t_resets_clock() {
        let template = SegmentTemplate {
            timescale: Some("1".to_string()),
            initialization: None,
            media: Some("$Time$.m4s".to_string()),
            start_number: None,
            segment_timeline: Some(SegmentTimeline {
                entries: vec![
                    TimelineEntry {
                        t: Some("100".to_string()),
                        d: "4".to_string(),
                        r: None,
                    },
                    TimelineEntry {
                        t: None,
                        d: "6".to_string(),
                        r: None,
                    },
                ],
            }),
        };

        let segments = expand_timeline(&template, "v1", "100", 1, 1);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].time, 100);
        // No t: clock advances from the previous entry.
        assert_eq!(segments[1].time, 104);
    }

    #[test]
    fn test_master_playlist_top_quality_only() {
        let h = handler();
        let mpd = parse_mpd(STATIC_MPD).unwrap();
        let req = StreamRequest {
            url: "https://cdn.com/live/stream.mpd".to_string(),
            ..Default::default()
        };
        let playlist = h.build_master_playlist(&mpd, &req);

        let stream_infs: Vec<&str> = playlist
            .lines()
            .filter(|l| l.starts_with("#EXT-X-STREAM-INF"))
            .collect();
        assert_eq!(stream_infs.len(), 1);
        assert!(stream_infs[0].contains("BANDWIDTH=5000000"));
        assert!(stream_infs[0].contains("RESOLUTION=1920x1080"));
        assert!(stream_infs[0].contains("AUDIO=\"audio\""));

        let media_lines: Vec<&str> = playlist
            .lines()
            .filter(|l| l.starts_with("#EXT-X-MEDIA"))
            .collect();
        assert_eq!(media_lines.len(), 1);
        assert!(media_lines[0].contains("DEFAULT=YES"));
        assert!(media_lines[0].contains("LANGUAGE=\"en\""));

        // The variant URL selects the top representation.
        let variant_url = playlist
            .lines()
            .skip_while(|l| !l.starts_with("#EXT-X-STREAM-INF"))
            .nth(1)
            .unwrap();
        assert!(variant_url.contains("rep_id=v2"));
        assert!(variant_url.starts_with("https://p/proxy/hls/manifest.m3u8?"));
    }

    #[test]
    fn test_media_playlist_vod() {
        let h = handler();
        let mpd = parse_mpd(STATIC_MPD).unwrap();
        let req = StreamRequest {
            url: "https://cdn.com/live/stream.mpd".to_string(),
            ..Default::default()
        };
        let playlist = h.build_media_playlist(&mpd, "v2", &req);

        assert!(playlist.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(playlist.contains("#EXT-X-TARGETDURATION:10"));
        assert!(playlist.ends_with("#EXT-X-ENDLIST"));

        let extinf_count = playlist.lines().filter(|l| l.starts_with("#EXTINF")).count();
        assert_eq!(extinf_count, 3);
        assert!(playlist.contains("#EXTINF:4.000,"));

        // Segment lines route through the decrypt endpoint with the
        // remux-only sentinel.
        let seg_line = playlist
            .lines()
            .find(|l| l.starts_with("https://p/decrypt/segment.ts?"))
            .unwrap();
        assert!(seg_line.contains("skip_decrypt=1"));
        assert!(seg_line.contains("init_url="));
    }

    #[test]
    fn test_media_playlist_live_window() {
        let h = handler();
        // 25 segments of 4s at timescale 1
        let mpd_body = r#"<MPD type="dynamic">
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate timescale="1" media="seg_$Time$.m4s" startNumber="1">
        <SegmentTimeline><S t="0" d="4" r="24"/></SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v1" bandwidth="1000000" width="1920" height="1080"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
        let mpd = parse_mpd(mpd_body).unwrap();
        let req = StreamRequest {
            url: "https://cdn.com/live/stream.mpd".to_string(),
            ..Default::default()
        };
        let playlist = h.build_media_playlist(&mpd, "v1", &req);

        let extinf_count = playlist.lines().filter(|l| l.starts_with("#EXTINF")).count();
        assert_eq!(extinf_count, 20);
        assert!(playlist.contains("#EXT-X-TARGETDURATION:5"));
        // First surviving segment starts at t=20 -> sequence 20/4 = 5
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:5"));
        assert!(playlist.contains("#EXT-X-START:TIME-OFFSET=-30.0,PRECISE=NO"));
        assert!(!playlist.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_media_playlist_unknown_rep() {
        let h = handler();
        let mpd = parse_mpd(STATIC_MPD).unwrap();
        let req = StreamRequest::default();
        let playlist = h.build_media_playlist(&mpd, "nope", &req);
        assert!(playlist.contains("#EXT-X-ERROR"));
    }

    #[test]
    fn test_media_playlist_clearkey_params() {
        let h = handler();
        let mpd = parse_mpd(STATIC_MPD).unwrap();
        let req = StreamRequest {
            url: "https://cdn.com/live/stream.mpd".to_string(),
            clear_key: Some("00000000000000000000000000000001:0123456789abcdef0123456789abcdef".to_string()),
            ..Default::default()
        };
        let playlist = h.build_media_playlist(&mpd, "v2", &req);
        let seg_line = playlist
            .lines()
            .find(|l| l.starts_with("https://p/decrypt/segment.ts?"))
            .unwrap();
        assert!(seg_line.contains("key_id=00000000000000000000000000000001"));
        assert!(seg_line.contains("key=0123456789abcdef0123456789abcdef"));
        assert!(!seg_line.contains("skip_decrypt"));
    }

    #[test]
    fn test_base_url_prefers_mpd_level() {
        let h = handler();
        let mpd_body = r#"<MPD type="static">
  <BaseURL>https://media.cdn.com/assets/</BaseURL>
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate timescale="1" media="seg_$Number$.m4s">
        <SegmentTimeline><S t="0" d="4"/></SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v1" bandwidth="1" width="1" height="1"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
        let mpd = parse_mpd(mpd_body).unwrap();
        let req = StreamRequest {
            url: "https://origin.com/path/stream.mpd?sig=x".to_string(),
            ..Default::default()
        };
        let playlist = h.build_media_playlist(&mpd, "v1", &req);
        assert!(playlist.contains(
            &format!("url={}", urlencode("https://media.cdn.com/assets/seg_1.m4s"))
        ));
    }

    fn urlencode(s: &str) -> String {
        url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
    }
}
