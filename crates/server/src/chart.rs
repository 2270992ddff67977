//! Tally chart renderer.
//!
//! Turns three counts into a compact horizontal bar chart with one bar per
//! category, always in Agree / Skip / Disagree order and with fixed colours.
//! Charts live on mount points of a [`Document`]; rendering onto a mount
//! point replaces whatever chart it held, and the returned [`ChartHandle`]
//! disposes it again.

use std::collections::HashMap;

use maud::{Markup, html};

use crate::models::{Choice, Tally};

pub const CHART_WIDTH: f64 = 300.0;
pub const CHART_HEIGHT: f64 = 80.0;
/// Fraction of a row's height covered by its bar.
const BAR_FILL: f64 = 0.7;

pub fn color_of(choice: Choice) -> &'static str {
    match choice {
        Choice::Agree => "#00FF00",
        Choice::Skip => "#AAAAAA",
        Choice::Disagree => "#FF0000",
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MountError {
    #[error("mount point `{0}` does not exist")]
    Missing(String),
    #[error("mount point `{0}` is detached")]
    Detached(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub choice: Choice,
    pub count: u64,
    pub color: &'static str,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TallyChart {
    bars: [Bar; 3],
}

impl TallyChart {
    pub fn new(tally: Tally) -> Self {
        let max = Choice::ALL
            .iter()
            .map(|&choice| tally.get(choice))
            .max()
            .unwrap_or(0);
        let row_height = CHART_HEIGHT / Choice::ALL.len() as f64;
        let bar_height = row_height * BAR_FILL;

        let bars = Choice::ALL.map(|choice| {
            let count = tally.get(choice);
            let row = Choice::ALL.iter().position(|&c| c == choice).unwrap_or(0) as f64;
            let width = if max == 0 {
                0.0
            } else {
                count as f64 * CHART_WIDTH / max as f64
            };
            Bar {
                choice,
                count,
                color: color_of(choice),
                x: 0.0,
                y: row * row_height + (row_height - bar_height) / 2.0,
                width,
                height: bar_height,
            }
        });

        Self { bars }
    }

    pub fn bars(&self) -> &[Bar; 3] {
        &self.bars
    }

    pub fn tally(&self) -> Tally {
        let [agree, skip, disagree] = self.bars.map(|bar| bar.count);
        Tally {
            agree,
            skip,
            disagree,
        }
    }

    fn summary(&self) -> String {
        self.bars
            .iter()
            .map(|bar| format!("{} {}", label(bar.choice), bar.count))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// SVG fragment. Carries no axes, legend or tooltip elements.
    pub fn markup(&self) -> Markup {
        html! {
            svg xmlns="http://www.w3.org/2000/svg"
                data-testid="tally-chart"
                role="img"
                aria-label=(self.summary())
                width=(CHART_WIDTH)
                height=(CHART_HEIGHT)
                viewBox={ "0 0 " (CHART_WIDTH) " " (CHART_HEIGHT) } {
                @for bar in &self.bars {
                    rect data-category=(bar.choice.as_str())
                        data-count=(bar.count)
                        x=(bar.x)
                        y=(bar.y)
                        width=(bar.width)
                        height=(bar.height)
                        fill=(bar.color) {}
                }
            }
        }
    }
}

fn label(choice: Choice) -> &'static str {
    match choice {
        Choice::Agree => "Agree",
        Choice::Skip => "Skip",
        Choice::Disagree => "Disagree",
    }
}

#[derive(Debug)]
struct Mounted {
    instance: u64,
    chart: TallyChart,
}

#[derive(Debug)]
struct MountPoint {
    attached: bool,
    chart: Option<Mounted>,
}

/// Addressable render targets, keyed by element id.
#[derive(Debug, Default)]
pub struct Document {
    mounts: HashMap<String, MountPoint>,
    next_instance: u64,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the mount point, or re-attaches it if it already exists.
    pub fn mount(&mut self, id: impl Into<String>) {
        self.mounts
            .entry(id.into())
            .and_modify(|mount| mount.attached = true)
            .or_insert(MountPoint {
                attached: true,
                chart: None,
            });
    }

    pub fn detach(&mut self, id: &str) -> bool {
        match self.mounts.get_mut(id) {
            Some(mount) => {
                mount.attached = false;
                true
            }
            None => false,
        }
    }

    pub fn chart(&self, id: &str) -> Option<&TallyChart> {
        self.mounts
            .get(id)
            .and_then(|mount| mount.chart.as_ref())
            .map(|mounted| &mounted.chart)
    }

    pub fn chart_count(&self, id: &str) -> usize {
        usize::from(self.chart(id).is_some())
    }

    /// The mount point element with its chart, if any.
    pub fn markup(&self, id: &str) -> Option<Markup> {
        let mount = self.mounts.get(id)?;
        Some(html! {
            div id=(id) {
                @if let Some(mounted) = &mount.chart {
                    (mounted.chart.markup())
                }
            }
        })
    }

    fn attached_mount(&mut self, id: &str) -> Result<&mut MountPoint, MountError> {
        match self.mounts.get_mut(id) {
            None => Err(MountError::Missing(id.to_string())),
            Some(mount) if !mount.attached => Err(MountError::Detached(id.to_string())),
            Some(mount) => Ok(mount),
        }
    }
}

/// Disposes the chart it was returned for. Stale once the chart is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartHandle {
    target: String,
    instance: u64,
}

impl ChartHandle {
    pub fn is_current(&self, doc: &Document) -> bool {
        doc.mounts
            .get(&self.target)
            .and_then(|mount| mount.chart.as_ref())
            .is_some_and(|mounted| mounted.instance == self.instance)
    }

    /// Returns false if the chart was already replaced or disposed.
    pub fn dispose(&self, doc: &mut Document) -> bool {
        if !self.is_current(doc) {
            return false;
        }
        if let Some(mount) = doc.mounts.get_mut(&self.target) {
            mount.chart = None;
        }
        true
    }
}

pub fn render_tally_chart(
    doc: &mut Document,
    target: &str,
    agree: u64,
    skip: u64,
    disagree: u64,
) -> Result<ChartHandle, MountError> {
    let instance = doc.next_instance;
    let mount = doc.attached_mount(target)?;
    mount.chart = Some(Mounted {
        instance,
        chart: TallyChart::new(Tally {
            agree,
            skip,
            disagree,
        }),
    });
    doc.next_instance += 1;

    Ok(ChartHandle {
        target: target.to_string(),
        instance,
    })
}
