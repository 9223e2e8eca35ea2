use std::cmp::Ordering;

use serde::Serialize;

use crate::tool::ToolFormat;

/// One selectable encoding option, as presented to the extension. The
/// synthetic "best" entries carry only an id and a label.
#[derive(Debug, Clone, Serialize)]
pub struct FormatDescriptor {
    pub format_id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abr: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct FormatBuckets {
    pub video: Vec<FormatDescriptor>,
    pub audio: Vec<FormatDescriptor>,
}

/// Splits the tool's format list into video/audio buckets, sorts each bucket
/// descending by its quality metric, and prepends the automatic "best" entry.
pub fn partition(formats: Vec<ToolFormat>) -> FormatBuckets {
    let mut video = Vec::new();
    let mut audio = Vec::new();

    for format in formats {
        match format.kind.as_deref() {
            Some("video") => video.push(descriptor(format)),
            Some("audio") => audio.push(descriptor(format)),
            _ => {}
        }
    }

    video.sort_by(|a, b| b.height.unwrap_or(0).cmp(&a.height.unwrap_or(0)));
    audio.sort_by(|a, b| {
        b.abr
            .unwrap_or(0.0)
            .partial_cmp(&a.abr.unwrap_or(0.0))
            .unwrap_or(Ordering::Equal)
    });

    video.insert(0, sentinel("best", "Best Quality (Auto)"));
    audio.insert(0, sentinel("bestaudio", "Best Audio (Auto)"));

    FormatBuckets { video, audio }
}

fn descriptor(format: ToolFormat) -> FormatDescriptor {
    let label = format.label.unwrap_or_else(|| format.format_id.clone());
    FormatDescriptor {
        format_id: format.format_id,
        label,
        ext: format.ext,
        height: format.height,
        fps: format.fps,
        abr: format.abr,
    }
}

fn sentinel(format_id: &str, label: &str) -> FormatDescriptor {
    FormatDescriptor {
        format_id: format_id.to_string(),
        label: label.to_string(),
        ext: None,
        height: None,
        fps: None,
        abr: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(format_id: &str, height: u32) -> ToolFormat {
        ToolFormat {
            format_id: format_id.to_string(),
            kind: Some("video".to_string()),
            label: Some(format!("{height}p")),
            ext: Some("mp4".to_string()),
            height: Some(height),
            fps: Some(30.0),
            abr: None,
        }
    }

    fn audio(format_id: &str, abr: f32) -> ToolFormat {
        ToolFormat {
            format_id: format_id.to_string(),
            kind: Some("audio".to_string()),
            label: Some(format!("{abr}kbps")),
            ext: Some("m4a".to_string()),
            height: None,
            fps: None,
            abr: Some(abr),
        }
    }

    #[test]
    fn buckets_are_sorted_descending_with_one_sentinel_each() {
        let buckets = partition(vec![
            video("a", 360),
            audio("x", 64.0),
            video("b", 1080),
            audio("y", 160.0),
            video("c", 720),
        ]);

        let heights: Vec<_> = buckets.video.iter().map(|f| f.height).collect();
        assert_eq!(heights, vec![None, Some(1080), Some(720), Some(360)]);
        assert_eq!(buckets.video[0].format_id, "best");

        let bitrates: Vec<_> = buckets.audio.iter().map(|f| f.abr).collect();
        assert_eq!(bitrates, vec![None, Some(160.0), Some(64.0)]);
        assert_eq!(buckets.audio[0].format_id, "bestaudio");
    }

    #[test]
    fn single_format_per_bucket_scenario() {
        let buckets = partition(vec![video("22", 720), audio("140", 128.0)]);

        assert_eq!(buckets.video.len(), 2);
        assert_eq!(buckets.video[0].format_id, "best");
        assert_eq!(buckets.video[1].height, Some(720));

        assert_eq!(buckets.audio.len(), 2);
        assert_eq!(buckets.audio[0].format_id, "bestaudio");
        assert_eq!(buckets.audio[1].abr, Some(128.0));
    }

    #[test]
    fn unknown_kinds_are_dropped() {
        let mut other = video("s", 480);
        other.kind = Some("storyboard".to_string());
        let mut untyped = audio("u", 96.0);
        untyped.kind = None;

        let buckets = partition(vec![other, untyped]);
        assert_eq!(buckets.video.len(), 1);
        assert_eq!(buckets.audio.len(), 1);
    }

    #[test]
    fn sentinels_serialize_without_optional_fields() {
        let buckets = partition(Vec::new());
        let json = serde_json::to_value(&buckets.video[0]).unwrap();
        assert_eq!(json["format_id"], "best");
        assert!(json.get("ext").is_none());
        assert!(json.get("height").is_none());
    }

    #[test]
    fn missing_metrics_sort_last() {
        let mut unknown = video("u", 0);
        unknown.height = None;

        let buckets = partition(vec![unknown, video("hd", 720)]);
        assert_eq!(buckets.video[1].format_id, "hd");
        assert_eq!(buckets.video[2].format_id, "u");
    }
}
