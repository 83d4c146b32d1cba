use tracing::warn;

/// An aperture choice: the parsed f-number plus the device's own label.
///
/// The label is retained because it, not the parsed float, is what gets
/// written back to the settings tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Aperture {
    pub f_number: f64,
    pub label: String,
}

impl Aperture {
    /// Parse a device label; aperture labels are plain decimal f-stops.
    pub fn parse(label: &str) -> Option<Self> {
        let f_number: f64 = label.trim().parse().ok()?;
        Some(Self {
            f_number,
            label: label.to_string(),
        })
    }
}

/// A shutter speed choice in seconds, plus the device's own label.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutterSpeed {
    pub seconds: f64,
    pub label: String,
}

impl ShutterSpeed {
    /// Parse a device label: either a plain decimal ("0.3") or a
    /// fractional "numerator/denominator" form ("1/125").
    pub fn parse(label: &str) -> Option<Self> {
        let text = label.trim();
        let seconds = match text.split_once('/') {
            Some((numerator, denominator)) => {
                let numerator: f64 = numerator.trim().parse().ok()?;
                let denominator: f64 = denominator.trim().parse().ok()?;
                if denominator == 0.0 {
                    return None;
                }
                numerator / denominator
            }
            None => text.parse().ok()?,
        };
        Some(Self {
            seconds,
            label: label.to_string(),
        })
    }
}

/// Numeric bounds a sweep is clipped to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepBounds {
    /// Largest admitted f-number
    pub aperture_max: f64,
    /// Fastest admitted shutter speed, seconds
    pub shutter_min: f64,
    /// Slowest admitted shutter speed, seconds
    pub shutter_max: f64,
}

/// One cell of the exposure matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepCell {
    pub aperture: Aperture,
    pub shutter: ShutterSpeed,
}

impl SweepCell {
    /// Directory component for this cell's aperture.
    pub fn aperture_dir(&self) -> String {
        self.aperture.f_number.to_string()
    }

    /// Filename stub encoding the shutter speed, so cells within one
    /// aperture directory never collide.
    pub fn file_stub(&self) -> String {
        format!("_{}", self.shutter.seconds)
    }
}

/// Build the ordered exposure matrix from raw device choice lists.
///
/// Apertures above `aperture_max` and shutter speeds outside the closed
/// `[shutter_min, shutter_max]` interval are dropped, both axes are
/// sorted ascending, and the cross product is emitted with aperture as
/// the outer loop. Labels that do not parse as numbers ("Bulb", "auto")
/// are skipped; the sweep is defined over numeric domains only.
pub fn plan(
    aperture_labels: &[String],
    shutter_labels: &[String],
    bounds: &SweepBounds,
) -> Vec<SweepCell> {
    let mut apertures: Vec<Aperture> = aperture_labels
        .iter()
        .filter_map(|label| match Aperture::parse(label) {
            Some(aperture) => Some(aperture),
            None => {
                warn!("Skipping unparsable aperture choice {:?}", label);
                None
            }
        })
        .filter(|aperture| aperture.f_number <= bounds.aperture_max)
        .collect();
    apertures.sort_by(|a, b| a.f_number.total_cmp(&b.f_number));

    let mut shutters: Vec<ShutterSpeed> = shutter_labels
        .iter()
        .filter_map(|label| match ShutterSpeed::parse(label) {
            Some(shutter) => Some(shutter),
            None => {
                warn!("Skipping unparsable shutter speed choice {:?}", label);
                None
            }
        })
        .filter(|shutter| {
            shutter.seconds >= bounds.shutter_min && shutter.seconds <= bounds.shutter_max
        })
        .collect();
    shutters.sort_by(|a, b| a.seconds.total_cmp(&b.seconds));

    let mut cells = Vec::with_capacity(apertures.len() * shutters.len());
    for aperture in &apertures {
        for shutter in &shutters {
            cells.push(SweepCell {
                aperture: aperture.clone(),
                shutter: shutter.clone(),
            });
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_aperture_parse() {
        let aperture = Aperture::parse("5.6").unwrap();
        assert_eq!(aperture.f_number, 5.6);
        assert_eq!(aperture.label, "5.6");
        assert!(Aperture::parse("auto").is_none());
    }

    #[test]
    fn test_shutter_parse_decimal_and_fraction() {
        assert_eq!(ShutterSpeed::parse("0.3").unwrap().seconds, 0.3);
        assert_eq!(ShutterSpeed::parse("2").unwrap().seconds, 2.0);
        let fast = ShutterSpeed::parse("1/125").unwrap();
        assert_eq!(fast.seconds, 1.0 / 125.0);
        assert_eq!(fast.label, "1/125");
        assert!(ShutterSpeed::parse("Bulb").is_none());
        assert!(ShutterSpeed::parse("1/0").is_none());
    }

    #[test]
    fn test_plan_filters_sorts_and_orders() {
        let apertures = labels(&["2.8", "5.6", "8"]);
        let shutters = labels(&["1/125", "1/60", "1/30"]);
        let bounds = SweepBounds {
            aperture_max: 5.6,
            shutter_min: 0.008,
            shutter_max: 1.0 / 30.0,
        };

        let cells = plan(&apertures, &shutters, &bounds);
        let emitted: Vec<(&str, &str)> = cells
            .iter()
            .map(|c| (c.aperture.label.as_str(), c.shutter.label.as_str()))
            .collect();

        // Aperture 8 excluded; aperture outer loop, shutter inner, both ascending
        assert_eq!(
            emitted,
            vec![
                ("2.8", "1/125"),
                ("2.8", "1/60"),
                ("2.8", "1/30"),
                ("5.6", "1/125"),
                ("5.6", "1/60"),
                ("5.6", "1/30"),
            ]
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        let apertures = labels(&["8", "2.8", "11", "5.6"]);
        let shutters = labels(&["1/30", "1/125", "0.3", "1/60"]);
        let bounds = SweepBounds {
            aperture_max: 11.0,
            shutter_min: 0.001,
            shutter_max: 1.0,
        };

        let first = plan(&apertures, &shutters, &bounds);
        let second = plan(&apertures, &shutters, &bounds);
        assert_eq!(first, second);

        // Unsorted input comes out ascending on both axes
        let f_numbers: Vec<f64> = first.iter().step_by(4).map(|c| c.aperture.f_number).collect();
        assert_eq!(f_numbers, vec![2.8, 5.6, 8.0, 11.0]);
        let seconds: Vec<f64> = first[..4].iter().map(|c| c.shutter.seconds).collect();
        assert!(seconds.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_plan_skips_non_numeric_labels() {
        let apertures = labels(&["auto", "4"]);
        let shutters = labels(&["Bulb", "1/60"]);
        let bounds = SweepBounds {
            aperture_max: 8.0,
            shutter_min: 0.001,
            shutter_max: 1.0,
        };

        let cells = plan(&apertures, &shutters, &bounds);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].aperture.label, "4");
        assert_eq!(cells[0].shutter.label, "1/60");
    }

    #[test]
    fn test_plan_shutter_bounds_are_inclusive() {
        let shutters = labels(&["1/125", "1/30", "1/4"]);
        let bounds = SweepBounds {
            aperture_max: 8.0,
            shutter_min: 1.0 / 125.0,
            shutter_max: 1.0 / 30.0,
        };

        let cells = plan(&labels(&["5.6"]), &shutters, &bounds);
        let speeds: Vec<&str> = cells.iter().map(|c| c.shutter.label.as_str()).collect();
        assert_eq!(speeds, vec!["1/125", "1/30"]);
    }

    #[test]
    fn test_cell_output_naming() {
        let cell = SweepCell {
            aperture: Aperture::parse("5.6").unwrap(),
            shutter: ShutterSpeed::parse("1/125").unwrap(),
        };
        assert_eq!(cell.aperture_dir(), "5.6");
        assert_eq!(cell.file_stub(), "_0.008");
    }
}
