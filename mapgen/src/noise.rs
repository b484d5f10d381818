//! Seeded value noise. The hash is the classic sin-fract construction;
//! it is kept despite its quirks because the client renders with the
//! identical formula.

/// frac(sin(x*127.1 + z*311.7 + seed) * 43758.5453)
fn hash(x: f64, z: f64, seed: f64) -> f64 {
    let v = (x * 127.1 + z * 311.7 + seed).sin() * 43758.5453;
    v - v.floor()
}

/// Bilinearly smoothed value noise over the integer lattice.
fn noise(x: f64, z: f64, seed: f64) -> f64 {
    let xi = x.floor();
    let zi = z.floor();
    let xf = x - xi;
    let zf = z - zi;

    let a = hash(xi, zi, seed);
    let b = hash(xi + 1.0, zi, seed);
    let c = hash(xi, zi + 1.0, seed);
    let d = hash(xi + 1.0, zi + 1.0, seed);

    // smoothstep weights
    let u = xf * xf * (3.0 - 2.0 * xf);
    let w = zf * zf * (3.0 - 2.0 * zf);

    a + (b - a) * u + (c - a) * w + (a - b - c + d) * u * w
}

/// Five octaves of fractal Brownian motion.
pub fn fbm(x: f64, z: f64, seed: f64) -> f64 {
    let mut value = 0.0;
    let mut amplitude = 0.5;
    let mut frequency = 1.0;
    for _ in 0..5 {
        value += amplitude * noise(x * frequency, z * frequency, seed);
        frequency *= 2.0;
        amplitude *= 0.5;
    }
    value
}
