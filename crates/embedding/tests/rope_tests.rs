use candle_core::{Device, Result, Tensor};
use embedding::positional::rope::{scaling_fingerprint, Rope, RopeConfig};

fn assert_send_sync<T: Send + Sync>() {}

fn config(head_dim: usize, rotate_dim: Option<usize>) -> RopeConfig {
    RopeConfig {
        head_dim,
        rotate_dim,
        ..RopeConfig::default()
    }
}

fn sample(rows: usize, heads: usize, head_dim: usize) -> Result<Tensor> {
    let data: Vec<f32> = (0..rows * heads * head_dim)
        .map(|v| ((v * 7 % 13) as f32 - 6.0) * 0.25)
        .collect();
    Tensor::from_vec(data, (rows, heads, head_dim), &Device::Cpu)
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    a.sub(b)?.abs()?.max_all()?.to_vec0::<f32>()
}

/// Scalar reference rotation of one row.
fn naive_rotate(row: &[f32], pos: f64, inv_freqs: &[f64]) -> Vec<f32> {
    let mut out = row.to_vec();
    for (i, inv) in inv_freqs.iter().enumerate() {
        let angle = pos * inv;
        let (s, c) = (angle.sin(), angle.cos());
        let a = row[2 * i] as f64;
        let b = row[2 * i + 1] as f64;
        out[2 * i] = (a * c - b * s) as f32;
        out[2 * i + 1] = (b * c + a * s) as f32;
    }
    out
}

#[test]
fn rope_types_are_send_sync() {
    assert_send_sync::<RopeConfig>();
    assert_send_sync::<Rope>();
}

#[test]
fn new_rejects_odd_or_oversized_rotate_dim() {
    assert!(Rope::new(config(8, Some(3))).is_err());
    assert!(Rope::new(config(8, Some(10))).is_err());
    assert!(Rope::new(config(0, None)).is_err());
    assert!(Rope::new(RopeConfig {
        freq_scale: 0.0,
        ..config(8, None)
    })
    .is_err());
}

#[test]
fn matches_naive_rotation_for_arbitrary_positions() -> Result<()> {
    let rope = Rope::new(config(8, None))?;
    let x = sample(3, 2, 8)?;
    let positions = Tensor::new(&[5u32, 0, 17], &Device::Cpu)?;

    let rotated = rope.apply(&x, &positions, None)?.to_vec3::<f32>()?;
    let inv_freqs = rope.inv_freqs(None)?;
    let input = x.to_vec3::<f32>()?;

    for (r, pos) in [5.0, 0.0, 17.0].iter().enumerate() {
        for h in 0..2 {
            let expected = naive_rotate(&input[r][h], *pos, &inv_freqs);
            for (got, want) in rotated[r][h].iter().zip(expected.iter()) {
                assert!((got - want).abs() < 1e-5, "row {r} head {h}: {got} vs {want}");
            }
        }
    }
    Ok(())
}

#[test]
fn tail_dimensions_pass_through_unchanged() -> Result<()> {
    let rope = Rope::new(config(16, Some(8)))?;
    let x = sample(2, 1, 16)?;
    let positions = Tensor::new(&[3u32, 9], &Device::Cpu)?;

    let rotated = rope.apply(&x, &positions, None)?;
    let tail_in = x.narrow(2, 8, 8)?.to_vec3::<f32>()?;
    let tail_out = rotated.narrow(2, 8, 8)?.to_vec3::<f32>()?;
    assert_eq!(tail_in, tail_out);
    Ok(())
}

#[test]
fn position_zero_is_identity() -> Result<()> {
    let rope = Rope::new(config(8, None))?;
    let x = sample(2, 2, 8)?;
    let positions = Tensor::new(&[0u32, 0], &Device::Cpu)?;
    let rotated = rope.apply(&x, &positions, None)?;
    assert!(max_abs_diff(&rotated, &x)? < 1e-7);
    Ok(())
}

#[test]
fn rotations_compose_additively() -> Result<()> {
    let rope = Rope::new(RopeConfig {
        freq_scale: 0.5,
        ..config(8, Some(6))
    })?;
    let x = sample(2, 1, 8)?;

    let first = rope.apply(&x, &Tensor::new(&[4f32, 11.0], &Device::Cpu)?, None)?;
    let back = rope.apply(&first, &Tensor::new(&[-2f32, -2.0], &Device::Cpu)?, None)?;
    let direct = rope.apply(&x, &Tensor::new(&[2f32, 9.0], &Device::Cpu)?, None)?;

    assert!(max_abs_diff(&back, &direct)? < 1e-5);
    Ok(())
}

#[test]
fn frequency_factors_divide_angles() -> Result<()> {
    let rope = Rope::new(config(4, None))?;
    let factors = Tensor::new(&[2f32, 4.0], &Device::Cpu)?;
    let x = sample(1, 1, 4)?;

    let with_factors = rope.apply(&x, &Tensor::new(&[8u32], &Device::Cpu)?, Some(&factors))?;
    let inv = rope.inv_freqs(Some(&factors))?;
    assert!((inv[0] - 0.5).abs() < 1e-12);

    let expected = naive_rotate(&x.to_vec3::<f32>()?[0][0], 8.0, &inv);
    let got = with_factors.to_vec3::<f32>()?;
    for (g, e) in got[0][0].iter().zip(expected.iter()) {
        assert!((g - e).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn factors_with_wrong_length_are_rejected() -> Result<()> {
    let rope = Rope::new(config(8, None))?;
    let factors = Tensor::new(&[1f32, 1.0], &Device::Cpu)?;
    let x = sample(1, 1, 8)?;
    let positions = Tensor::new(&[1u32], &Device::Cpu)?;
    assert!(rope.apply(&x, &positions, Some(&factors)).is_err());
    Ok(())
}

#[test]
fn fingerprint_mentions_rotation_geometry() {
    let fp = scaling_fingerprint(&config(64, Some(32)));
    assert!(fp.contains("rot=32"));
    assert!(fp.contains("head_dim=64"));
}
