use serde::{Deserialize, Serialize};
use crate::config::SelectorConfig;
use crate::downloader::profile::SharedNetworkProfile;
use crate::downloader::DownloadLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    Balanced,
    Standard,
    Low,
}

impl QualityTier {
    /// Maps a network score (0-10) and media duration to a tier.
    pub fn for_conditions(network_score: f64, duration_sec: f64) -> Self {
        if network_score >= 8.0 {
            if duration_sec > 300.0 {
                QualityTier::Balanced
            } else {
                QualityTier::High
            }
        } else if network_score >= 5.0 {
            if duration_sec > 180.0 {
                QualityTier::Standard
            } else {
                QualityTier::Balanced
            }
        } else {
            QualityTier::Low
        }
    }
}

/// Label predicates, tried in the order a tier lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkRule {
    /// HD marker and video marker.
    HdVideo,
    /// Video marker, no HD marker, no audio marker.
    PlainVideo,
    /// Video marker, no audio marker.
    AnyVideo,
    /// First candidate, whatever its label.
    First,
}

const TIER_RULES: &[(QualityTier, &[LinkRule])] = &[
    (QualityTier::High, &[LinkRule::HdVideo, LinkRule::PlainVideo, LinkRule::First]),
    (QualityTier::Balanced, &[LinkRule::PlainVideo, LinkRule::HdVideo, LinkRule::First]),
    (QualityTier::Standard, &[LinkRule::PlainVideo, LinkRule::First]),
    (QualityTier::Low, &[LinkRule::PlainVideo, LinkRule::AnyVideo, LinkRule::First]),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionContext {
    pub duration_sec: f64,
    pub network_score: f64,
}

/// Picks one candidate URL from the resolver's link list.
#[derive(Debug, Clone)]
pub struct QualitySelector {
    profile: SharedNetworkProfile,
    markers: SelectorConfig,
}

impl QualitySelector {
    pub fn new(profile: SharedNetworkProfile, markers: SelectorConfig) -> Self {
        Self { profile, markers }
    }

    /// Scores the shared network profile and selects for the given duration.
    pub fn select_optimal_quality<'a>(
        &self,
        links: &'a [DownloadLink],
        duration_sec: f64,
    ) -> Option<&'a str> {
        let context = SelectionContext {
            duration_sec,
            network_score: self.profile.network_score(),
        };
        self.select_with_context(links, context)
    }

    pub fn select_with_context<'a>(
        &self,
        links: &'a [DownloadLink],
        context: SelectionContext,
    ) -> Option<&'a str> {
        if links.is_empty() {
            return None;
        }

        let tier = QualityTier::for_conditions(context.network_score, context.duration_sec);
        log::info!(
            "🧠 [SELECT] duration={:.0}s network_score={:.2} tier={:?}",
            context.duration_sec,
            context.network_score,
            tier
        );

        let rules = TIER_RULES
            .iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, rules)| *rules)
            .unwrap_or(&[LinkRule::PlainVideo, LinkRule::First]);

        for rule in rules {
            if let Some(link) = links.iter().find(|link| self.matches(*rule, link)) {
                log::info!("🎯 [SELECT] {:?} matched label '{}'", rule, link.label);
                return Some(link.url.as_str());
            }
        }

        None
    }

    /// First usable link carrying the audio marker.
    pub fn select_audio<'a>(&self, links: &'a [DownloadLink]) -> Option<&'a str> {
        links
            .iter()
            .filter(|link| is_usable(link))
            .find(|link| link.label.contains(self.markers.audio_marker.as_str()))
            .map(|link| link.url.as_str())
    }

    /// Links without a URL never match, so every rule falls through to the next candidate.
    fn matches(&self, rule: LinkRule, link: &DownloadLink) -> bool {
        if !is_usable(link) {
            return false;
        }
        let label = link.label.as_str();
        let hd = label.contains(self.markers.hd_marker.as_str());
        let video = label.contains(self.markers.video_marker.as_str());
        let audio = label.contains(self.markers.audio_marker.as_str());

        match rule {
            LinkRule::HdVideo => hd && video,
            LinkRule::PlainVideo => video && !hd && !audio,
            LinkRule::AnyVideo => video && !audio,
            LinkRule::First => true,
        }
    }
}

fn is_usable(link: &DownloadLink) -> bool {
    !link.url.trim().is_empty()
}
