use nalgebra::{Vector3, Vector4};

/// A trait to add physics-related methods to a momentum three-vector.
pub trait ThreeMomentum {
    /// The magnitude of the momentum.
    fn mag(&self) -> f64;
    /// The squared magnitude of the momentum.
    fn mag2(&self) -> f64;
    /// The component transverse to the beam ($`x`$ in the tracking frame).
    fn pt(&self) -> f64;
    /// The energy of a particle with this momentum and the given `mass`.
    fn energy(&self, mass: f64) -> f64;
    /// Construct a four-momentum with the given `mass`, stored as $`(p_x, p_y, p_z, E)`$.
    fn with_mass(&self, mass: f64) -> Vector4<f64>;
}

impl ThreeMomentum for Vector3<f64> {
    fn mag(&self) -> f64 {
        self.norm()
    }

    fn mag2(&self) -> f64 {
        self.norm_squared()
    }

    fn pt(&self) -> f64 {
        self.y.hypot(self.z)
    }

    fn energy(&self, mass: f64) -> f64 {
        (self.mag2() + mass.powi(2)).sqrt()
    }

    fn with_mass(&self, mass: f64) -> Vector4<f64> {
        Vector4::new(self.x, self.y, self.z, self.energy(mass))
    }
}

/// A trait to treat a [`Vector4`] as a four-momentum $`(p_x, p_y, p_z, E)`$.
pub trait FourMomentum {
    /// The energy component.
    fn e(&self) -> f64;
    /// The three-momentum part.
    fn momentum(&self) -> Vector3<f64>;
    /// The squared invariant mass $`E^2 - |\vec{p}|^2`$ (may be negative from rounding).
    fn m2(&self) -> f64;
    /// The invariant mass, or [`None`] if the squared mass is not positive.
    fn m(&self) -> Option<f64>;
}

impl FourMomentum for Vector4<f64> {
    fn e(&self) -> f64 {
        self.w
    }

    fn momentum(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    fn m2(&self) -> f64 {
        self.e().powi(2) - self.momentum().mag2()
    }

    fn m(&self) -> Option<f64> {
        let m2 = self.m2();
        (m2 > 0.0).then(|| m2.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_three_momentum() {
        let p = Vector3::new(1.0, 2.0, 2.0);
        assert_relative_eq!(p.mag(), 3.0);
        assert_relative_eq!(p.pt(), 8.0_f64.sqrt());
        assert_relative_eq!(p.energy(4.0), 5.0);
    }

    #[test]
    fn test_four_momentum_sums() {
        let a = Vector3::new(1.0, 0.1, 0.0).with_mass(0.0);
        let b = Vector3::new(1.0, -0.1, 0.0).with_mass(0.0);
        let sum = a + b;
        assert_relative_eq!(sum.e(), 2.0 * 1.01_f64.sqrt());
        assert_relative_eq!(sum.m().unwrap(), (4.0 * 1.01 - 4.0_f64).sqrt(), epsilon = 1e-12);
        assert!(Vector4::new(1.0, 0.0, 0.0, 0.5).m().is_none());
    }
}
