//! Generic `Robot` trait over a flat vector of joint values.
//!
//! Controllers never own the robot. They hold a shared handle for as long as
//! they are attached and read/write the whole DOF vector at once, touching
//! only the indices they control.

/// A robot whose joint state is a flat, DOF-indexed vector.
///
/// Implementations use interior mutability so that several controllers can
/// share one handle.
pub trait Robot: Send + Sync {
    /// Human-readable robot name, used in log fields.
    fn name(&self) -> &str;

    /// Snapshot of every DOF value, indexed by DOF.
    fn dof_values(&self) -> Vec<f64>;

    /// Overwrite the full DOF vector.
    ///
    /// `values` must have [`dof_count`][Self::dof_count] entries.
    fn set_dof_values(&self, values: &[f64]);

    /// Number of DOFs this robot exposes.
    fn dof_count(&self) -> usize {
        self.dof_values().len()
    }
}
