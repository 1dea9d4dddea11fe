//! Multi-monitor support.
//!
//! Matches the outputs RandR reports against the declared monitors. Every
//! active output must be declared and every declared monitor must show up;
//! anything else is a startup error. With no monitors declared at all, each
//! output is adopted under its connector name.

use std::collections::{BTreeMap, HashSet};

use crate::config::MonitorConfig;
use crate::display::OutputInfo;
use crate::error::MonitorError;
use crate::geometry::Rect;

/// An output paired with its monitor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedOutput {
    pub name: String,
    pub config: MonitorConfig,
    pub screen: usize,
    pub rect: Rect,
}

/// Pair each detected `(screen, output)` with its declared monitor.
///
/// The result keeps detection order, which is the order monitors are
/// searched in for point lookups.
pub fn match_outputs(
    configs: &BTreeMap<String, MonitorConfig>,
    detected: &[(usize, OutputInfo)],
) -> Result<Vec<MatchedOutput>, MonitorError> {
    if configs.is_empty() {
        return Ok(adopt_all(detected));
    }

    let mut matched = Vec::with_capacity(detected.len());
    let mut used = HashSet::new();

    for (screen, output) in detected {
        let (name, config) = configs
            .iter()
            .find(|(_, c)| c.screen == *screen && c.connector == output.name)
            .ok_or_else(|| MonitorError::UnconfiguredConnector {
                screen: *screen,
                connector: output.name.clone(),
            })?;

        if !used.insert(name.as_str()) {
            return Err(MonitorError::DuplicateMonitor(name.clone()));
        }

        log::info!(
            "Monitor '{}': {} on screen {} at {}x{}+{}+{}",
            name,
            output.name,
            screen,
            output.rect.width,
            output.rect.height,
            output.rect.x,
            output.rect.y
        );
        matched.push(MatchedOutput {
            name: name.clone(),
            config: config.clone(),
            screen: *screen,
            rect: output.rect,
        });
    }

    if let Some(missing) = configs.keys().find(|name| !used.contains(name.as_str())) {
        return Err(MonitorError::MissingMonitor(missing.clone()));
    }

    Ok(matched)
}

fn adopt_all(detected: &[(usize, OutputInfo)]) -> Vec<MatchedOutput> {
    let mut names = HashSet::new();
    detected
        .iter()
        .map(|(screen, output)| {
            let mut name = output.name.clone();
            if !names.insert(name.clone()) {
                name = format!("{}:{}", screen, output.name);
                names.insert(name.clone());
            }
            log::info!(
                "Adopting output {} on screen {} as monitor '{}' ({}x{}+{}+{})",
                output.name,
                screen,
                name,
                output.rect.width,
                output.rect.height,
                output.rect.x,
                output.rect.y
            );
            MatchedOutput {
                name,
                config: MonitorConfig::adopted(*screen, &output.name),
                screen: *screen,
                rect: output.rect,
            }
        })
        .collect()
}
