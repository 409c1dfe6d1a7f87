//! Randomized client fingerprints for rendering sessions.
//!
//! Every session draws a user agent, a viewport, and a locale/timezone pair
//! from weighted pools of values that real desktop browsers report. The
//! generator owns its random source so tests can seed it.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::models::Engine;

/// User agents for rotation, weighted by rough market share. The flag marks
/// Chromium-family strings, the only ones a headless Chromium can wear.
const USER_AGENTS: &[(&str, u32, bool)] = &[
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
        40,
        true,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
        20,
        true,
    ),
    (
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
        10,
        true,
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36 Edg/134.0.0.0",
        10,
        true,
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
        10,
        false,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:137.0) Gecko/20100101 Firefox/137.0",
        5,
        false,
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.3 Safari/605.1.15",
        5,
        false,
    ),
];

/// Common desktop resolutions.
const VIEWPORTS: &[(u32, u32, u32)] = &[
    (1920, 1080, 30),
    (1366, 768, 20),
    (1536, 864, 15),
    (1440, 900, 10),
    (1280, 720, 10),
    (1600, 900, 8),
    (1280, 800, 5),
    (1024, 768, 2),
];

/// Locale and timezone drawn together so they stay plausible.
const REGIONS: &[(&str, &str, u32)] = &[
    ("en-US", "America/New_York", 25),
    ("en-US", "America/Chicago", 10),
    ("en-US", "America/Los_Angeles", 15),
    ("en-GB", "Europe/London", 15),
    ("de-DE", "Europe/Berlin", 10),
    ("fr-FR", "Europe/Paris", 8),
    ("ja-JP", "Asia/Tokyo", 10),
    ("en-AU", "Australia/Sydney", 7),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Client-observable browser characteristics for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
}

impl Fingerprint {
    /// Value for an `Accept-Language` header matching the locale.
    pub fn accept_language(&self) -> String {
        match self.locale.split_once('-') {
            Some((lang, _)) if lang != self.locale => {
                format!("{},{};q=0.9", self.locale, lang)
            }
            _ => self.locale.clone(),
        }
    }
}

/// Thread-safe fingerprint source.
pub struct FingerprintGenerator {
    rng: Mutex<StdRng>,
}

impl FingerprintGenerator {
    /// Seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn lock_rng(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A fingerprint for any engine, drawn from the full user-agent pool.
    pub fn generate(&self) -> Fingerprint {
        self.generate_for(Engine::LightHttp)
    }

    /// A fingerprint `engine` can present consistently: browser engines only
    /// get Chromium-family user agents.
    pub fn generate_for(&self, engine: Engine) -> Fingerprint {
        let mut rng = self.lock_rng();
        let user_agent = pick_user_agent(&mut *rng, engine.is_browser());
        let viewport = VIEWPORTS
            .choose_weighted(&mut *rng, |v| v.2)
            .map(|&(width, height, _)| Viewport { width, height })
            .unwrap_or(Viewport {
                width: 1920,
                height: 1080,
            });
        let (locale, timezone) = REGIONS
            .choose_weighted(&mut *rng, |r| r.2)
            .map(|&(l, t, _)| (l, t))
            .unwrap_or(("en-US", "America/New_York"));

        Fingerprint {
            user_agent: user_agent.to_string(),
            viewport,
            locale: locale.to_string(),
            timezone: timezone.to_string(),
        }
    }

}

impl Default for FingerprintGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn pick_user_agent<R: Rng + ?Sized>(rng: &mut R, chromium_only: bool) -> &'static str {
    let pool: Vec<&(&str, u32, bool)> = USER_AGENTS
        .iter()
        .filter(|ua| ua.2 || !chromium_only)
        .collect();
    pool.choose_weighted(rng, |ua| ua.1)
        .map(|ua| ua.0)
        .unwrap_or(USER_AGENTS[0].0)
}

/// A random user agent from the rotation pool.
pub fn random_user_agent() -> &'static str {
    pick_user_agent(&mut rand::thread_rng(), false)
}
