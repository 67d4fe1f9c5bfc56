//! # Trajectory Figure
//!
//! Renders the fitted mean trajectories as a three-facet panel (one facet
//! per model variant): lines with point markers, x = months, y = fitted mean
//! response, one color per arm, legend along the bottom of each facet.

use crate::scenario::{ModelVariant, ScenarioResult};
use plotters::prelude::*;
use std::error::Error;
use std::path::Path;

/// Fixed categorical palette: control, treatment.
const CONTROL_COLOR: RGBColor = RGBColor(0xd9, 0x5f, 0x02);
const TREATMENT_COLOR: RGBColor = RGBColor(0x1b, 0x9e, 0x77);

const FIGURE_SIZE: (u32, u32) = (1500, 560);

/// Draws the faceted figure to `out_path` (PNG).
pub fn render_figure(out_path: &Path, result: &ScenarioResult) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(out_path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, ModelVariant::ALL.len()));

    let t_max = result
        .time_grid
        .last()
        .copied()
        .unwrap_or(1.0);

    // Shared y-range across facets so the attenuation is visually comparable.
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for variant in ModelVariant::ALL {
        let (control, treatment) = result.fitted_trajectories(variant);
        for &(_, y) in control.iter().chain(treatment.iter()) {
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }
    }
    let pad = 0.15 * (y_max - y_min).max(1.0);
    let y_range = (y_min - pad)..(y_max + pad);

    for (panel, variant) in panels.iter().zip(ModelVariant::ALL) {
        let (control, treatment) = result.fitted_trajectories(variant);

        let mut chart = ChartBuilder::on(panel)
            .caption(variant.label(), ("sans-serif", 22))
            .margin(12)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(-0.3f64..(t_max + 0.3), y_range.clone())?;

        chart
            .configure_mesh()
            .x_desc("Months")
            .y_desc("Estimated mean MG-ADL")
            .x_labels(result.time_grid.len())
            .draw()?;

        for (points, color, name) in [
            (&control, CONTROL_COLOR, "Control"),
            (&treatment, TREATMENT_COLOR, "Treatment"),
        ] {
            chart
                .draw_series(LineSeries::new(
                    points.iter().copied(),
                    color.stroke_width(3),
                ))?
                .label(name)
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(3))
                });
            chart.draw_series(
                points
                    .iter()
                    .map(|&(x, y)| Circle::new((x, y), 5, color.filled())),
            )?;
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::LowerMiddle)
            .background_style(&WHITE.mix(0.85))
            .border_style(&BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}
