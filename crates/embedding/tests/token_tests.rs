use candle_core::{DType, Device, Result, Tensor};
use embedding::token::TokenEmbedding;

fn table(vocab: usize, hidden: usize) -> Result<Tensor> {
    let data: Vec<f32> = (0..vocab * hidden).map(|v| v as f32 * 0.1).collect();
    Tensor::from_vec(data, (vocab, hidden), &Device::Cpu)
}

#[test]
fn forward_gathers_rows_in_order() -> Result<()> {
    let embedding = TokenEmbedding::new(table(6, 3)?)?;
    let ids = Tensor::new(&[4u32, 0, 4], &Device::Cpu)?;

    let out = embedding.forward(&ids)?.to_vec2::<f32>()?;

    assert_eq!(out.len(), 3);
    assert_eq!(out[0], out[2]);
    assert!((out[0][0] - 1.2).abs() < 1e-6);
    assert_eq!(out[1], vec![0.0, 0.1, 0.2]);
    Ok(())
}

#[test]
fn forward_returns_f32_for_half_tables() -> Result<()> {
    let embedding = TokenEmbedding::new(table(4, 2)?.to_dtype(DType::F16)?)?;
    let ids = Tensor::new(&[1u32, 2], &Device::Cpu)?;
    let out = embedding.forward(&ids)?;
    assert_eq!(out.dims(), &[2, 2]);
    assert_eq!(out.dtype(), DType::F32);
    Ok(())
}

#[test]
fn forward_rejects_out_of_range_ids() -> Result<()> {
    let embedding = TokenEmbedding::new(table(4, 3)?)?;
    let ids = Tensor::new(&[0u32, 4], &Device::Cpu)?;

    let err = embedding.forward(&ids).unwrap_err();
    assert!(err.to_string().contains("token id 4 exceeds vocab size"));
    Ok(())
}

#[test]
fn forward_rejects_float_ids() -> Result<()> {
    let embedding = TokenEmbedding::new(table(4, 3)?)?;
    let ids = Tensor::new(&[0f32, 1.0], &Device::Cpu)?;
    assert!(embedding.forward(&ids).is_err());
    Ok(())
}

#[test]
fn tied_head_scores_each_vocabulary_row() -> Result<()> {
    let embedding = TokenEmbedding::new(table(5, 4)?)?;
    let ids = Tensor::new(&[2u32, 3], &Device::Cpu)?;
    let hidden = embedding.forward(&ids)?;

    let logits = embedding.linear_out(&hidden)?;
    assert_eq!(logits.dims(), &[2, 5]);

    let manual = hidden.matmul(&embedding.weight().t()?)?;
    let diff = logits.sub(&manual)?.abs()?.max_all()?.to_vec0::<f32>()?;
    assert!(diff < 1e-6);
    Ok(())
}
