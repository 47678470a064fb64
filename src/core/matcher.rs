use crate::core::registry::KnownFaceRegistry;

/// Wire/log label for a face that matched nobody.
pub const UNAUTHORISED: &str = "Unauthorised";

/// Nearest-distance-with-threshold classifier over the registry's vector
/// space. The threshold is a configuration constant, not learned.
#[derive(Debug, Clone, Copy)]
pub struct FaceMatcher {
    threshold: f32,
}

impl FaceMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Returns the matched name, or `None` for the unauthorised bucket.
    ///
    /// The minimum distance must be strictly below the threshold; ties keep
    /// the first occurrence (stable argmin), so duplicate names shadow by
    /// registry order.
    pub fn classify<'a>(&self, probe: &[f32], registry: &'a KnownFaceRegistry) -> Option<&'a str> {
        let mut best: Option<(&'a str, f32)> = None;
        for face in registry.faces() {
            let distance = euclidean_distance(probe, &face.encoding);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((face.name.as_str(), distance)),
            }
        }

        match best {
            Some((name, distance)) if distance < self.threshold => Some(name),
            _ => None,
        }
    }

    /// `classify` rendered as the label written to logs and the serial link.
    pub fn label<'a>(&self, probe: &[f32], registry: &'a KnownFaceRegistry) -> &'a str {
        self.classify(probe, registry).unwrap_or(UNAUTHORISED)
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
