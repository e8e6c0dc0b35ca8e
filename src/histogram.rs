//! Histogram interface consumed by `Histo1D`/`Histo2D`/`Histo3D` actions,
//! plus a minimal reference implementation.
//!
//! The engine only depends on [`Histogram`]; `Histogram1D`/`2D`/`3D` are
//! reference material, not the tested contract surface.

use std::sync::Arc;

/// Opaque histogram aggregate. Implementors are expected to be cheap to
/// clone-empty (seeding one instance per slot) and cheap to merge via
/// [`Histogram::add`].
pub trait Histogram: Send + Sync {
    /// Fill at the 1D/2D/3D coordinate(s) given, with weight 1.0.
    fn fill1(&mut self, x: f64) {
        self.fill1_weighted(x, 1.0);
    }
    fn fill1_weighted(&mut self, x: f64, w: f64);

    fn fill2(&mut self, x: f64, y: f64) {
        self.fill2_weighted(x, y, 1.0);
    }
    fn fill2_weighted(&mut self, x: f64, y: f64, w: f64);

    fn fill3(&mut self, x: f64, y: f64, z: f64) {
        self.fill3_weighted(x, y, z, 1.0);
    }
    fn fill3_weighted(&mut self, x: f64, y: f64, z: f64, w: f64);

    /// Produce an independent, empty-but-configured copy (same binning,
    /// zeroed counts) — used to seed one instance per slot.
    fn clone_empty(&self) -> Box<dyn Histogram>;

    /// Merge `other`'s bins into `self`, bin-wise.
    fn add(&mut self, other: &dyn Histogram);

    /// Whether every axis already has fixed, non-degenerate limits.
    fn has_axis_limits(&self) -> bool;

    /// Enable auto-extension: a `fill` outside the current axis range grows
    /// the axis to include it instead of discarding the entry. Used only
    /// for the 1D deferred-limits mode; 2D/3D without limits are rejected
    /// at booking.
    fn set_can_extend_all_axes(&mut self);

    fn as_any(&self) -> &dyn std::any::Any;
}

fn bin_index(min: f64, max: f64, nbins: usize, x: f64) -> Option<usize> {
    if x < min || x >= max || nbins == 0 {
        return None;
    }
    let width = (max - min) / nbins as f64;
    let idx = ((x - min) / width) as usize;
    Some(idx.min(nbins - 1))
}

/// A fixed- or extensible-range 1D histogram over a flat bin buffer.
#[derive(Debug, Clone)]
pub struct Histogram1D {
    min: f64,
    max: f64,
    bins: Vec<f64>,
    can_extend: bool,
}

impl Histogram1D {
    pub fn new(nbins: usize, min: f64, max: f64) -> Self {
        Histogram1D {
            min,
            max,
            bins: vec![0.0; nbins.max(1)],
            can_extend: false,
        }
    }

    pub fn counts(&self) -> &[f64] {
        &self.bins
    }

    pub fn axis_range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Double the covered range until it contains `x`, reassigning each old
    /// bin's count to the new bin that contains its center. An
    /// approximation (counts are not subdivided across overlapping new
    /// bins) — acceptable for a reference/non-authoritative implementation.
    fn extend_to_contain(&mut self, x: f64) {
        let nbins = self.bins.len();
        let mut min = self.min;
        let mut max = self.max;
        if max <= min {
            min = x - 1.0;
            max = x + 1.0;
        }
        while x < min || x >= max {
            let span = max - min;
            min -= span / 2.0;
            max += span / 2.0;
        }
        let old_width = (self.max - self.min) / nbins as f64;
        let mut new_bins = vec![0.0; nbins];
        for (i, count) in self.bins.iter().enumerate() {
            if *count == 0.0 {
                continue;
            }
            let center = self.min + old_width * (i as f64 + 0.5);
            if let Some(new_idx) = bin_index(min, max, nbins, center) {
                new_bins[new_idx] += count;
            }
        }
        self.min = min;
        self.max = max;
        self.bins = new_bins;
    }
}

impl Histogram for Histogram1D {
    fn fill1_weighted(&mut self, x: f64, w: f64) {
        match bin_index(self.min, self.max, self.bins.len(), x) {
            Some(idx) => self.bins[idx] += w,
            None if self.can_extend => {
                self.extend_to_contain(x);
                if let Some(idx) = bin_index(self.min, self.max, self.bins.len(), x) {
                    self.bins[idx] += w;
                }
            }
            None => {}
        }
    }

    fn fill2_weighted(&mut self, _x: f64, _y: f64, _w: f64) {
        unimplemented!("Histogram1D does not accept 2D fills")
    }

    fn fill3_weighted(&mut self, _x: f64, _y: f64, _z: f64, _w: f64) {
        unimplemented!("Histogram1D does not accept 3D fills")
    }

    fn clone_empty(&self) -> Box<dyn Histogram> {
        Box::new(Histogram1D {
            min: self.min,
            max: self.max,
            bins: vec![0.0; self.bins.len()],
            can_extend: self.can_extend,
        })
    }

    fn add(&mut self, other: &dyn Histogram) {
        let other = other
            .as_any()
            .downcast_ref::<Histogram1D>()
            .expect("Histogram1D::add requires another Histogram1D");
        debug_assert_eq!(self.bins.len(), other.bins.len());
        for (a, b) in self.bins.iter_mut().zip(other.bins.iter()) {
            *a += b;
        }
    }

    fn has_axis_limits(&self) -> bool {
        self.max > self.min
    }

    fn set_can_extend_all_axes(&mut self) {
        self.can_extend = true;
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A fixed-range 2D histogram; deferred-limits mode is not supported.
#[derive(Debug, Clone)]
pub struct Histogram2D {
    x_range: (f64, f64),
    y_range: (f64, f64),
    x_bins: usize,
    y_bins: usize,
    bins: Vec<f64>,
}

impl Histogram2D {
    pub fn new(x_bins: usize, x_range: (f64, f64), y_bins: usize, y_range: (f64, f64)) -> Self {
        Histogram2D {
            x_range,
            y_range,
            x_bins: x_bins.max(1),
            y_bins: y_bins.max(1),
            bins: vec![0.0; x_bins.max(1) * y_bins.max(1)],
        }
    }

    pub fn counts(&self) -> &[f64] {
        &self.bins
    }
}

impl Histogram for Histogram2D {
    fn fill1_weighted(&mut self, _x: f64, _w: f64) {
        unimplemented!("Histogram2D does not accept 1D fills")
    }

    fn fill2_weighted(&mut self, x: f64, y: f64, w: f64) {
        let ix = bin_index(self.x_range.0, self.x_range.1, self.x_bins, x);
        let iy = bin_index(self.y_range.0, self.y_range.1, self.y_bins, y);
        if let (Some(ix), Some(iy)) = (ix, iy) {
            self.bins[iy * self.x_bins + ix] += w;
        }
    }

    fn fill3_weighted(&mut self, _x: f64, _y: f64, _z: f64, _w: f64) {
        unimplemented!("Histogram2D does not accept 3D fills")
    }

    fn clone_empty(&self) -> Box<dyn Histogram> {
        Box::new(Histogram2D {
            x_range: self.x_range,
            y_range: self.y_range,
            x_bins: self.x_bins,
            y_bins: self.y_bins,
            bins: vec![0.0; self.bins.len()],
        })
    }

    fn add(&mut self, other: &dyn Histogram) {
        let other = other
            .as_any()
            .downcast_ref::<Histogram2D>()
            .expect("Histogram2D::add requires another Histogram2D");
        for (a, b) in self.bins.iter_mut().zip(other.bins.iter()) {
            *a += b;
        }
    }

    fn has_axis_limits(&self) -> bool {
        self.x_range.1 > self.x_range.0 && self.y_range.1 > self.y_range.0
    }

    fn set_can_extend_all_axes(&mut self) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A fixed-range 3D histogram; deferred-limits mode is not supported.
#[derive(Debug, Clone)]
pub struct Histogram3D {
    x_range: (f64, f64),
    y_range: (f64, f64),
    z_range: (f64, f64),
    x_bins: usize,
    y_bins: usize,
    z_bins: usize,
    bins: Vec<f64>,
}

impl Histogram3D {
    pub fn new(
        x_bins: usize,
        x_range: (f64, f64),
        y_bins: usize,
        y_range: (f64, f64),
        z_bins: usize,
        z_range: (f64, f64),
    ) -> Self {
        let total = x_bins.max(1) * y_bins.max(1) * z_bins.max(1);
        Histogram3D {
            x_range,
            y_range,
            z_range,
            x_bins: x_bins.max(1),
            y_bins: y_bins.max(1),
            z_bins: z_bins.max(1),
            bins: vec![0.0; total],
        }
    }

    pub fn counts(&self) -> &[f64] {
        &self.bins
    }
}

impl Histogram for Histogram3D {
    fn fill1_weighted(&mut self, _x: f64, _w: f64) {
        unimplemented!("Histogram3D does not accept 1D fills")
    }

    fn fill2_weighted(&mut self, _x: f64, _y: f64, _w: f64) {
        unimplemented!("Histogram3D does not accept 2D fills")
    }

    fn fill3_weighted(&mut self, x: f64, y: f64, z: f64, w: f64) {
        let ix = bin_index(self.x_range.0, self.x_range.1, self.x_bins, x);
        let iy = bin_index(self.y_range.0, self.y_range.1, self.y_bins, y);
        let iz = bin_index(self.z_range.0, self.z_range.1, self.z_bins, z);
        if let (Some(ix), Some(iy), Some(iz)) = (ix, iy, iz) {
            self.bins[(iz * self.y_bins + iy) * self.x_bins + ix] += w;
        }
    }

    fn clone_empty(&self) -> Box<dyn Histogram> {
        Box::new(Histogram3D {
            x_range: self.x_range,
            y_range: self.y_range,
            z_range: self.z_range,
            x_bins: self.x_bins,
            y_bins: self.y_bins,
            z_bins: self.z_bins,
            bins: vec![0.0; self.bins.len()],
        })
    }

    fn add(&mut self, other: &dyn Histogram) {
        let other = other
            .as_any()
            .downcast_ref::<Histogram3D>()
            .expect("Histogram3D::add requires another Histogram3D");
        for (a, b) in self.bins.iter_mut().zip(other.bins.iter()) {
            *a += b;
        }
    }

    fn has_axis_limits(&self) -> bool {
        self.x_range.1 > self.x_range.0 && self.y_range.1 > self.y_range.0 && self.z_range.1 > self.z_range.0
    }

    fn set_can_extend_all_axes(&mut self) {}

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A shared, type-erased handle to a published histogram result.
pub type HistogramResult = Arc<dyn Histogram>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_land_in_expected_bins() {
        let mut h = Histogram1D::new(4, 0.0, 8.0);
        for x in [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0] {
            h.fill1(x);
        }
        assert_eq!(h.counts(), &[2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn add_merges_bin_counts() {
        let mut a = Histogram1D::new(2, 0.0, 2.0);
        a.fill1(0.5);
        let mut b = Histogram1D::new(2, 0.0, 2.0);
        b.fill1(0.5);
        b.fill1(1.5);
        a.add(&b);
        assert_eq!(a.counts(), &[2.0, 1.0]);
    }

    #[test]
    fn extends_range_when_enabled() {
        let mut h = Histogram1D::new(2, 0.0, 2.0);
        h.set_can_extend_all_axes();
        h.fill1(0.5);
        h.fill1(10.0);
        assert!(h.axis_range().1 >= 10.0);
        assert_eq!(h.counts().iter().sum::<f64>(), 2.0);
    }

    #[test]
    fn out_of_range_fill_without_extension_is_dropped() {
        let mut h = Histogram1D::new(2, 0.0, 2.0);
        h.fill1(10.0);
        assert_eq!(h.counts().iter().sum::<f64>(), 0.0);
    }
}
