//! Train the update model on synthetic emotion transitions
//!
//! Demonstrates: samples → EmotionTrainer::fit → evaluation → checkpoint
//!
//! Run with:
//! ```bash
//! cargo run --example train_transition
//! ```

use an_emotion_model::evaluation::label_names;
use an_emotion_model::prelude::*;

fn transition(target: Emotion, turns: usize, device: &Device) -> Result<TransitionSample> {
    let seed = dummy_representation(Emotion::Neutral, device)?;
    let scores: Vec<(&str, f32)> = Emotion::ALL
        .iter()
        .map(|e| (e.name(), if *e == target { 2.0 } else { 0.1 }))
        .collect();
    let composition = sentiment_composition(&scores)?;
    TransitionSample::new(seed, vec![composition; turns], vec![target; turns])
}

fn main() -> Result<()> {
    let device = cpu_device();
    let targets = [Emotion::Happiness, Emotion::Anger, Emotion::Sadness];
    println!("Targets: {}", label_names(&targets));

    // 1. Synthetic data
    let mut train = Vec::new();
    let mut validation = Vec::new();
    for (i, target) in targets.iter().cycle().take(24).enumerate() {
        let sample = transition(*target, 1 + i % 3, &device)?;
        if i % 4 == 0 {
            validation.push(sample);
        } else {
            train.push(sample);
        }
    }
    println!("{} training / {} validation samples", train.len(), validation.len());

    // 2. Fit
    let model = EmotionModel::new(EmotionModelConfig::default().with_attention(AttentionKind::Additive))?;
    let config = LearningConfig {
        learning_rate: 0.01,
        epochs: 20,
        patience: Some(5),
        ..Default::default()
    };
    let mut trainer = EmotionTrainer::new(model, config)?;

    println!("\n--- Training ---");
    for metrics in trainer.fit(&train, &validation)? {
        println!(
            "  epoch {:>2}: loss {:.4}, accuracy {:.3}",
            metrics.epoch,
            metrics.loss,
            metrics.accuracy.unwrap_or_default()
        );
    }

    // 3. Evaluate and save
    let outcome = trainer.validate(&validation)?;
    println!("\nValidation: loss {:.4}, {}", outcome.loss, outcome.report);

    let model = trainer.into_model();
    let dir = std::env::temp_dir().join("an_emotion_model_demo");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("emotion_model.safetensors");
    let meta = CheckpointMetadata::new("emotion_model", "0.1.0", &model)?;
    model.save_with_metadata(&path, &meta)?;
    println!("Saved {} params to {}", meta.param_count, path.display());

    Ok(())
}
