//! Reflector 判定解析
//!
//! 接受与否是生成出来的判断，没有固定评分规则，所以解析方式可替换。

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Reflector 的判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Revise(String),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// 把 Reflector 的原始输出转换成判定
pub trait VerdictParser: Send + Sync {
    fn parse(&self, raw: &str) -> Verdict;
}

/// 默认解析器：查找 `VERDICT: ACCEPT` / `VERDICT: REVISE` 标记行
///
/// 找不到标记时按 `Revise` 处理，原文作为修改意见。
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerVerdictParser;

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"(?im)^[\s>#*_`-]*verdict[\s*_`]*[:：][\s*_`]*(accept|revise)\b[^\n]*$")
            .expect("verdict marker regex is valid")
    })
}

impl VerdictParser for MarkerVerdictParser {
    fn parse(&self, raw: &str) -> Verdict {
        let raw = raw.trim();
        let Some(caps) = marker_regex().captures(raw) else {
            warn!("Reflector 输出缺少判定标记，按需要修改处理");
            return Verdict::Revise(raw.to_string());
        };

        let decision = caps[1].to_ascii_lowercase();
        let feedback = marker_regex().replace_all(raw, "").trim().to_string();
        debug!("Reflector 判定: {}, 意见长度: {} 字符", decision, feedback.len());

        if decision == "accept" {
            Verdict::Accept
        } else {
            Verdict::Revise(feedback)
        }
    }
}
