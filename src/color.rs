use std::collections::{BTreeMap, BTreeSet};

use eframe::egui::Color32;
use palette::{Hsl, IntoColor, Srgb};

use esf_dashboard::data::Value;

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Color32> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            // start at cyan-blue rather than red
            let hue = (200.0 + (i as f32 / n as f32) * 360.0) % 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.50);
            let rgb: Srgb = hsl.into_color();
            Color32::from_rgb(
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Color mapping: cell value → Color32
// ---------------------------------------------------------------------------

/// Maps the distinct values of one column to stable colours, so a visit
/// type or outcome keeps its colour across charts and filter changes.
#[derive(Debug, Clone)]
pub struct ColorMap {
    mapping: BTreeMap<Value, Color32>,
    default_color: Color32,
}

impl ColorMap {
    /// Build a colour map from a column's distinct values.
    pub fn new(values: &BTreeSet<Value>) -> Self {
        let palette = generate_palette(values.len());
        let mapping: BTreeMap<Value, Color32> = values
            .iter()
            .zip(palette)
            .map(|(v, c)| (v.clone(), c))
            .collect();

        ColorMap {
            mapping,
            default_color: Color32::GRAY,
        }
    }

    /// Look up the colour for a given value.
    pub fn color_for(&self, value: &Value) -> Color32 {
        self.mapping
            .get(value)
            .copied()
            .unwrap_or(self.default_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_has_distinct_colours() {
        let p = generate_palette(5);
        assert_eq!(p.len(), 5);
        let unique: BTreeSet<_> = p.iter().map(|c| c.to_array()).collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn unknown_values_fall_back_to_grey() {
        let values: BTreeSet<Value> = ["Consulta", "Urgência"].into_iter().map(Value::from).collect();
        let map = ColorMap::new(&values);
        assert_ne!(map.color_for(&Value::text("Consulta")), Color32::GRAY);
        assert_eq!(map.color_for(&Value::text("Procedimento")), Color32::GRAY);
    }
}
