//! Shapes a line with the installed fonts and prints how it was laid out
//!
//! Run with: cargo run -p glyphrun --example shape_demo -- "Hello, 世界"

use glyphrun::{
    BoundingBoxType, BreakOptions, FontContext, FontGroup, FontSlant, FontStyle, TextConfig,
    TextRunFlags, TextRunParams,
};

fn main() -> glyphrun::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let text = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "The quick brown fox jumps over the lazy dog".to_string());
    let config = match std::env::var("GLYPHRUN_CONFIG") {
        Ok(path) => TextConfig::load(std::path::Path::new(&path))?,
        Err(_) => TextConfig::default(),
    };
    let app_units = config.app_units_per_dev_unit;

    let ctx = FontContext::from_system(config);
    tracing::info!("{} font families installed", ctx.font_list.len());

    let style = FontStyle::new(16.0, 400, FontSlant::Normal);
    let group = FontGroup::new("sans-serif", style, None, &ctx);
    let Some(run) = group.make_text_run_str(
        &text,
        &TextRunParams::new(app_units),
        TextRunFlags::COMPUTE_LINE_BREAKS,
    ) else {
        tracing::error!("Text too long to lay out");
        return Ok(());
    };

    for glyph_run in run.glyph_runs() {
        println!(
            "@{:>4}  {:<32} {:?}",
            glyph_run.char_offset,
            glyph_run.font.name(),
            glyph_run.match_type
        );
    }

    let metrics = run.measure_text(0, run.len(), BoundingBoxType::TightInkExtents, None);
    let px = app_units as f64;
    println!(
        "advance {:.1}px, ascent {:.1}px, descent {:.1}px, {} missing glyphs",
        metrics.advance_width / px,
        metrics.ascent / px,
        metrics.descent / px,
        run.count_missing_glyphs()
    );

    // Wrap at 200px
    let options = BreakOptions {
        width: 200.0 * px,
        suppress_initial_break: true,
        trim_whitespace: true,
        ..Default::default()
    };
    let mut start = 0;
    while start < run.len() {
        let result = run.break_and_measure_text(start, run.len() - start, &options, None);
        let fit = result.chars_fit.max(1);
        println!(
            "line {}..{} width {:.1}px",
            start,
            start + fit,
            result.metrics.advance_width / px
        );
        start += fit;
    }

    ctx.cache.shutdown();
    Ok(())
}
