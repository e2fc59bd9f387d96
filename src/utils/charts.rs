//! SVG chart generation for training artifacts
//!
//! Renders line charts for training curves, bar charts for per-class scores
//! and a row-normalized confusion matrix heatmap. Charts are written as
//! standalone SVG files with no external dependencies, so they can be opened
//! directly in a browser or embedded in reports.

use crate::utils::metrics::ConfusionMatrix;
use std::path::Path;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_BOTTOM: f64 = 70.0;

const COLOR_PRIMARY: &str = "#3498db";
const COLOR_TEXT: &str = "#2c3e50";
const COLOR_AXIS: &str = "#7f8c8d";
const COLOR_GRID: &str = "#ecf0f1";

/// A single (x, y) point, optionally annotated.
#[derive(Debug, Clone)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
    pub label: Option<String>,
}

impl DataPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, label: None }
    }
}

/// A named line on a line chart.
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<DataPoint>,
    pub color: String,
}

impl DataSeries {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: Vec::new(),
            color: color.into(),
        }
    }

    /// Build a series from y-values indexed 1..=n on the x axis.
    pub fn from_values(name: impl Into<String>, values: &[f64], color: impl Into<String>) -> Self {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &y)| DataPoint::new((i + 1) as f64, y))
            .collect();
        Self {
            name: name.into(),
            points,
            color: color.into(),
        }
    }
}

/// A single bar on a bar chart.
#[derive(Debug, Clone)]
pub struct BarData {
    pub label: String,
    pub value: f64,
    pub color: String,
}

impl BarData {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
            color: COLOR_PRIMARY.to_string(),
        }
    }
}

/// Render one or more data series as an SVG line chart.
pub fn generate_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    output_path: &Path,
) -> std::io::Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let (x_min, x_max, y_min, y_max) = find_ranges(series);

    let x_span = (x_max - x_min).max(1e-9);
    let y_span = (y_max - y_min).max(1e-9);
    let to_sx = |x: f64| MARGIN_LEFT + (x - x_min) / x_span * plot_width;
    let to_sy = |y: f64| CHART_HEIGHT - MARGIN_BOTTOM - (y - y_min) / y_span * plot_height;

    let mut svg = svg_header();
    svg.push_str(&chart_title(title));

    // Horizontal gridlines with y-axis value labels.
    for i in 0..=5 {
        let frac = i as f64 / 5.0;
        let y = CHART_HEIGHT - MARGIN_BOTTOM - frac * plot_height;
        let value = y_min + frac * y_span;
        svg.push_str(&format!(
            r#"  <line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{}" stroke-width="1"/>
"#,
            MARGIN_LEFT,
            y,
            CHART_WIDTH - MARGIN_RIGHT,
            y,
            COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"  <text x="{:.1}" y="{:.1}" font-size="11" fill="{}" text-anchor="end">{:.3}</text>
"#,
            MARGIN_LEFT - 8.0,
            y + 4.0,
            COLOR_TEXT,
            value
        ));
    }

    svg.push_str(&axes());

    for s in series {
        if s.points.is_empty() {
            continue;
        }
        let coords: Vec<String> = s
            .points
            .iter()
            .map(|p| format!("{:.1},{:.1}", to_sx(p.x), to_sy(p.y)))
            .collect();
        svg.push_str(&format!(
            r#"  <polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>
"#,
            coords.join(" "),
            s.color
        ));
        for p in &s.points {
            svg.push_str(&format!(
                r#"  <circle cx="{:.1}" cy="{:.1}" r="3" fill="{}"/>
"#,
                to_sx(p.x),
                to_sy(p.y),
                s.color
            ));
            if let Some(label) = &p.label {
                svg.push_str(&format!(
                    r#"  <text x="{:.1}" y="{:.1}" font-size="10" fill="{}" text-anchor="middle">{}</text>
"#,
                    to_sx(p.x),
                    to_sy(p.y) - 8.0,
                    COLOR_TEXT,
                    escape_xml(label)
                ));
            }
        }
    }

    // Legend along the bottom margin.
    let mut legend_x = MARGIN_LEFT;
    let legend_y = CHART_HEIGHT - 18.0;
    for s in series {
        svg.push_str(&format!(
            r#"  <rect x="{:.1}" y="{:.1}" width="12" height="12" fill="{}"/>
"#,
            legend_x,
            legend_y - 10.0,
            s.color
        ));
        svg.push_str(&format!(
            r#"  <text x="{:.1}" y="{:.1}" font-size="12" fill="{}">{}</text>
"#,
            legend_x + 16.0,
            legend_y,
            COLOR_TEXT,
            escape_xml(&s.name)
        ));
        legend_x += 16.0 + 8.0 * s.name.len() as f64 + 24.0;
    }

    svg.push_str(&axis_labels(x_label, y_label));
    svg.push_str("</svg>\n");

    std::fs::write(output_path, svg)
}

/// Render labeled bars as an SVG bar chart.
pub fn generate_bar_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    bars: &[BarData],
    output_path: &Path,
) -> std::io::Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let y_max = bars.iter().map(|b| b.value).fold(0.0f64, f64::max).max(1e-9);

    let mut svg = svg_header();
    svg.push_str(&chart_title(title));

    for i in 0..=5 {
        let frac = i as f64 / 5.0;
        let y = CHART_HEIGHT - MARGIN_BOTTOM - frac * plot_height;
        svg.push_str(&format!(
            r#"  <line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{}" stroke-width="1"/>
"#,
            MARGIN_LEFT,
            y,
            CHART_WIDTH - MARGIN_RIGHT,
            y,
            COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"  <text x="{:.1}" y="{:.1}" font-size="11" fill="{}" text-anchor="end">{:.2}</text>
"#,
            MARGIN_LEFT - 8.0,
            y + 4.0,
            COLOR_TEXT,
            frac * y_max
        ));
    }

    svg.push_str(&axes());

    let n = bars.len().max(1);
    let slot = plot_width / n as f64;
    let bar_width = (slot * 0.7).max(1.0);
    for (i, bar) in bars.iter().enumerate() {
        let height = (bar.value / y_max * plot_height).max(0.0);
        let x = MARGIN_LEFT + i as f64 * slot + (slot - bar_width) / 2.0;
        let y = CHART_HEIGHT - MARGIN_BOTTOM - height;
        svg.push_str(&format!(
            r#"  <rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>
"#,
            x, y, bar_width, height, bar.color
        ));
        // Tick label under each bar, rotated when the chart is crowded.
        let label_x = x + bar_width / 2.0;
        let label_y = CHART_HEIGHT - MARGIN_BOTTOM + 16.0;
        if bars.len() > 12 {
            svg.push_str(&format!(
                r#"  <text x="{:.1}" y="{:.1}" font-size="10" fill="{}" text-anchor="end" transform="rotate(-45 {:.1} {:.1})">{}</text>
"#,
                label_x,
                label_y,
                COLOR_TEXT,
                label_x,
                label_y,
                escape_xml(&bar.label)
            ));
        } else {
            svg.push_str(&format!(
                r#"  <text x="{:.1}" y="{:.1}" font-size="11" fill="{}" text-anchor="middle">{}</text>
"#,
                label_x,
                label_y,
                COLOR_TEXT,
                escape_xml(&bar.label)
            ));
        }
    }

    svg.push_str(&axis_labels(x_label, y_label));
    svg.push_str("</svg>\n");

    std::fs::write(output_path, svg)
}

/// Render a confusion matrix as a row-normalized SVG heatmap.
///
/// Cell intensity encodes the fraction of a row's samples that landed in the
/// cell; raw counts are printed inside cells for matrices up to 20 classes.
pub fn generate_confusion_heatmap(
    title: &str,
    cm: &ConfusionMatrix,
    output_path: &Path,
) -> std::io::Result<()> {
    let n = cm.num_classes.max(1);
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let cell_w = plot_width / n as f64;
    let cell_h = plot_height / n as f64;
    let normalized = cm.normalize_rows();

    let mut svg = svg_header();
    svg.push_str(&chart_title(title));

    for row in 0..cm.num_classes {
        for col in 0..cm.num_classes {
            let value = normalized[row * cm.num_classes + col];
            let x = MARGIN_LEFT + col as f64 * cell_w;
            let y = MARGIN_TOP + row as f64 * cell_h;
            svg.push_str(&format!(
                r#"  <rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" stroke="{}" stroke-width="0.5"/>
"#,
                x,
                y,
                cell_w,
                cell_h,
                heat_color(value),
                COLOR_GRID
            ));
            let count = cm.get(row, col);
            if cm.num_classes <= 20 && count > 0 {
                let text_color = if value > 0.5 { "#ffffff" } else { COLOR_TEXT };
                svg.push_str(&format!(
                    r#"  <text x="{:.1}" y="{:.1}" font-size="9" fill="{}" text-anchor="middle">{}</text>
"#,
                    x + cell_w / 2.0,
                    y + cell_h / 2.0 + 3.0,
                    text_color,
                    count
                ));
            }
        }
    }

    // Class indices along both axes.
    for i in 0..cm.num_classes {
        svg.push_str(&format!(
            r#"  <text x="{:.1}" y="{:.1}" font-size="10" fill="{}" text-anchor="middle">{}</text>
"#,
            MARGIN_LEFT + (i as f64 + 0.5) * cell_w,
            CHART_HEIGHT - MARGIN_BOTTOM + 14.0,
            COLOR_TEXT,
            i
        ));
        svg.push_str(&format!(
            r#"  <text x="{:.1}" y="{:.1}" font-size="10" fill="{}" text-anchor="end">{}</text>
"#,
            MARGIN_LEFT - 6.0,
            MARGIN_TOP + (i as f64 + 0.5) * cell_h + 3.0,
            COLOR_TEXT,
            i
        ));
    }

    svg.push_str(&axis_labels("Predicted", "Actual"));
    svg.push_str("</svg>\n");

    std::fs::write(output_path, svg)
}

fn svg_header() -> String {
    format!(
        r##"<svg width="{w}" height="{h}" viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg">
  <rect width="{w}" height="{h}" fill="#ffffff"/>
"##,
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    )
}

fn chart_title(title: &str) -> String {
    format!(
        r#"  <text x="{:.1}" y="32" font-size="20" font-weight="bold" fill="{}" text-anchor="middle">{}</text>
"#,
        CHART_WIDTH / 2.0,
        COLOR_TEXT,
        escape_xml(title)
    )
}

fn axes() -> String {
    format!(
        r#"  <line x1="{l:.1}" y1="{t:.1}" x2="{l:.1}" y2="{b:.1}" stroke="{axis}" stroke-width="1.5"/>
  <line x1="{l:.1}" y1="{b:.1}" x2="{r:.1}" y2="{b:.1}" stroke="{axis}" stroke-width="1.5"/>
"#,
        l = MARGIN_LEFT,
        r = CHART_WIDTH - MARGIN_RIGHT,
        t = MARGIN_TOP,
        b = CHART_HEIGHT - MARGIN_BOTTOM,
        axis = COLOR_AXIS
    )
}

fn axis_labels(x_label: &str, y_label: &str) -> String {
    let mut out = format!(
        r#"  <text x="{:.1}" y="{:.1}" font-size="13" fill="{}" text-anchor="middle">{}</text>
"#,
        MARGIN_LEFT + (CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT) / 2.0,
        CHART_HEIGHT - MARGIN_BOTTOM + 40.0,
        COLOR_TEXT,
        escape_xml(x_label)
    );
    let y_mid = MARGIN_TOP + (CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM) / 2.0;
    out.push_str(&format!(
        r#"  <text x="20" y="{:.1}" font-size="13" fill="{}" text-anchor="middle" transform="rotate(-90 20 {:.1})">{}</text>
"#,
        y_mid,
        COLOR_TEXT,
        y_mid,
        escape_xml(y_label)
    ));
    out
}

/// Interpolate from white to the primary blue.
fn heat_color(value: f64) -> String {
    let v = value.clamp(0.0, 1.0);
    let r = (255.0 - (255.0 - 52.0) * v) as u8;
    let g = (255.0 - (255.0 - 152.0) * v) as u8;
    let b = (255.0 - (255.0 - 219.0) * v) as u8;
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

/// Bounding ranges over all points of all series.
fn find_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for s in series {
        for p in &s.points {
            x_min = x_min.min(p.x);
            x_max = x_max.max(p.x);
            y_min = y_min.min(p.y);
            y_max = y_max.max(p.y);
        }
    }
    if !x_min.is_finite() {
        return (0.0, 1.0, 0.0, 1.0);
    }
    (x_min, x_max, y_min, y_max)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_line_chart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loss.svg");

        let series = vec![
            DataSeries::from_values("train loss", &[1.2, 0.8, 0.5, 0.35], COLOR_PRIMARY),
            DataSeries::from_values("val loss", &[1.3, 0.9, 0.6, 0.5], "#e74c3c"),
        ];
        generate_line_chart("Loss Curves", "Epoch", "Loss", &series, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("<svg"));
        assert!(contents.contains("polyline"));
        assert!(contents.contains("train loss"));
        assert!(contents.ends_with("</svg>\n"));
    }

    #[test]
    fn test_generate_bar_chart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f1.svg");

        let bars = vec![
            BarData::new("0", 0.91),
            BarData::new("1", 0.72),
            BarData::new("2", 0.88),
        ];
        generate_bar_chart("Per-class F1", "Class", "F1", &bars, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("<rect"));
        assert!(contents.contains("Per-class F1"));
    }

    #[test]
    fn test_generate_confusion_heatmap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.svg");

        let mut cm = ConfusionMatrix::new(3);
        cm.add(0, 0);
        cm.add(0, 0);
        cm.add(1, 2);
        cm.add(2, 2);
        generate_confusion_heatmap("Confusion Matrix", &cm, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Predicted"));
        assert!(contents.contains("Actual"));
        assert!(contents.contains("<rect"));
    }

    #[test]
    fn test_heat_color_endpoints() {
        assert_eq!(heat_color(0.0), "#ffffff");
        assert_eq!(heat_color(1.0), "#3498db");
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}
