//! One-page PDF sentiment report with a bar chart of the label counts.

use printpdf::{BuiltinFont, Color, Mm, PdfDocument, PdfLayerReference, Rect, Rgb};

use crate::error::AppError;
use crate::models::{SentimentCounts, SentimentLabel};

pub const REPORT_TITLE: &str = "Email Sentiment Analysis Report";
pub const REPORT_FILENAME: &str = "sentiment_report.pdf";

// US letter.
const PAGE_WIDTH: f32 = 215.9;
const PAGE_HEIGHT: f32 = 279.4;

const CHART_LEFT: f32 = 35.0;
const CHART_BOTTOM: f32 = 176.0;
const CHART_WIDTH: f32 = 141.0;
const CHART_HEIGHT: f32 = 90.0;
const AXIS_THICKNESS: f32 = 0.4;

const BAR_ORDER: [SentimentLabel; 3] = [
    SentimentLabel::Positive,
    SentimentLabel::Negative,
    SentimentLabel::Neutral,
];

/// Placement of one bar, in millimetres from the page's lower-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub label: SentimentLabel,
    pub count: u32,
    pub x: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub struct ChartLayout {
    pub bars: Vec<Bar>,
    /// Count that maps to the full chart height.
    pub scale_max: u32,
}

pub fn layout_chart(counts: &SentimentCounts) -> ChartLayout {
    let scale_max = BAR_ORDER
        .iter()
        .map(|label| counts.get(*label))
        .max()
        .unwrap_or(0)
        .max(1);

    let slot = CHART_WIDTH / BAR_ORDER.len() as f32;
    let width = slot * 0.6;

    let bars = BAR_ORDER
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let count = counts.get(*label);
            Bar {
                label: *label,
                count,
                x: CHART_LEFT + slot * i as f32 + (slot - width) / 2.0,
                width,
                height: CHART_HEIGHT * count as f32 / scale_max as f32,
            }
        })
        .collect();

    ChartLayout { bars, scale_max }
}

fn bar_color(label: SentimentLabel) -> Color {
    let (r, g, b): (u8, u8, u8) = match label {
        SentimentLabel::Positive => (0x4C, 0xAF, 0x50),
        SentimentLabel::Negative => (0xF4, 0x43, 0x36),
        SentimentLabel::Neutral => (0xFF, 0xC1, 0x07),
    };
    Color::Rgb(Rgb::new(
        f32::from(r) / 255.0,
        f32::from(g) / 255.0,
        f32::from(b) / 255.0,
        None,
    ))
}

fn black() -> Color {
    Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None))
}

fn report_error(e: printpdf::Error) -> AppError {
    AppError::Report(format!("{:?}", e))
}

/// One line of text on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub text: String,
    pub size: f32,
    pub x: f32,
    pub y: f32,
    pub bold: bool,
}

impl Caption {
    fn new(text: impl Into<String>, size: f32, x: f32, y: f32) -> Self {
        Self {
            text: text.into(),
            size,
            x,
            y,
            bold: false,
        }
    }
}

/// Every text line of the report: the title, axis labels and per-bar labels.
pub fn captions(chart: &ChartLayout) -> Vec<Caption> {
    let top = CHART_BOTTOM + CHART_HEIGHT;
    let mut captions = vec![
        Caption {
            bold: true,
            ..Caption::new(REPORT_TITLE, 16.0, CHART_LEFT, PAGE_HEIGHT - 15.0)
        },
        Caption::new("0", 9.0, CHART_LEFT - 5.0, CHART_BOTTOM),
        Caption::new(chart.scale_max.to_string(), 9.0, CHART_LEFT - 8.0, top - 3.0),
        Caption::new("Number of Emails", 10.0, CHART_LEFT - 5.0, top + 2.0),
        Caption::new(
            "Sentiment",
            10.0,
            CHART_LEFT + CHART_WIDTH / 2.0 - 8.0,
            CHART_BOTTOM - 14.0,
        ),
    ];

    for bar in &chart.bars {
        captions.push(Caption::new(
            bar.label.as_str(),
            10.0,
            bar.x + 2.0,
            CHART_BOTTOM - 6.0,
        ));
        captions.push(Caption::new(
            bar.count.to_string(),
            10.0,
            bar.x + bar.width / 2.0 - 1.5,
            CHART_BOTTOM + bar.height + 2.0,
        ));
    }

    captions
}

pub fn render_pdf(counts: &SentimentCounts) -> Result<Vec<u8>, AppError> {
    let (doc, page, layer) =
        PdfDocument::new(REPORT_TITLE, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Report");
    let layer = doc.get_page(page).get_layer(layer);
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(report_error)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(report_error)?;

    let chart = layout_chart(counts);
    draw_chart(&layer, &chart);

    layer.set_fill_color(black());
    for caption in captions(&chart) {
        let font = if caption.bold { &bold } else { &regular };
        layer.use_text(caption.text, caption.size, Mm(caption.x), Mm(caption.y), font);
    }

    doc.save_to_bytes().map_err(report_error)
}

fn draw_chart(layer: &PdfLayerReference, chart: &ChartLayout) {
    layer.set_fill_color(black());
    layer.add_rect(Rect::new(
        Mm(CHART_LEFT),
        Mm(CHART_BOTTOM),
        Mm(CHART_LEFT + CHART_WIDTH),
        Mm(CHART_BOTTOM + AXIS_THICKNESS),
    ));
    layer.add_rect(Rect::new(
        Mm(CHART_LEFT),
        Mm(CHART_BOTTOM),
        Mm(CHART_LEFT + AXIS_THICKNESS),
        Mm(CHART_BOTTOM + CHART_HEIGHT),
    ));

    for bar in chart.bars.iter().filter(|bar| bar.height > 0.0) {
        layer.set_fill_color(bar_color(bar.label));
        layer.add_rect(Rect::new(
            Mm(bar.x),
            Mm(CHART_BOTTOM + AXIS_THICKNESS),
            Mm(bar.x + bar.width),
            Mm(CHART_BOTTOM + AXIS_THICKNESS + bar.height),
        ));
    }
}
