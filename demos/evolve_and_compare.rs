//! Evolve a few candidate representations and pick the one closest to an ideal
//!
//! Demonstrates: sentiment composition → evolve → similarity ranking
//!
//! Run with:
//! ```bash
//! cargo run --example evolve_and_compare
//! ```

use an_emotion_model::prelude::*;
use std::collections::HashMap;

fn main() -> Result<()> {
    let device = cpu_device();

    // 1. Two turns of conversation
    let turns = [
        sentiment_composition(&[
            ("neutral", 0.2),
            ("anger", 0.0),
            ("disgust", 0.0),
            ("fear", 0.1),
            ("happiness", 2.0),
            ("sadness", 0.0),
            ("surprise", 0.5),
        ])?,
        sentiment_composition(&[
            ("neutral", 0.1),
            ("anger", 1.5),
            ("disgust", 0.4),
            ("fear", 0.0),
            ("happiness", 0.0),
            ("sadness", 0.3),
            ("surprise", 0.0),
        ])?,
    ];

    let seed = dummy_representation(Emotion::Neutral, &device)?;
    println!("Seed representation: {:?} ({})", seed.values(), seed.argmax());

    // 2. One candidate per attention variant
    let mut candidates = Vec::new();
    for kind in AttentionKind::ALL {
        let model = EmotionModel::new(EmotionModelConfig::default().with_attention(kind))?;
        let trajectory = model.evolve_vectors(vec![seed], &turns)?;
        let last = *trajectory.last().ok_or(EmotionCoreError::EmptyTrajectory)?;
        println!("  {:>20}: {} params, ends at {}", kind.name(), model.param_count(), last.argmax());
        candidates.push(last);
    }

    // 3. Rank against an ideal leaning towards happiness
    let tendency = HashMap::from([(Emotion::Happiness, 0.8), (Emotion::Surprise, 0.3)]);
    let ideal = ideal_representation(Some(&tendency), &device)?;

    let mut analyser = SimilarityAnalyser::new(SimilarityConfig::default().with_threshold(0.95))?;
    let scores = analyser.compare(&candidates, &ideal)?;
    println!("\nSimilarity scores: {:?}", scores);

    let best = analyser.most_similar_representation()?;
    println!(
        "Best score {:.4} shared by {} candidate(s) {:?}",
        best.similarity,
        best.representations.len(),
        analyser.most_similar_representation_index()?
    );

    // 4. Tighten the ceiling and refresh
    analyser.set_threshold(0.5)?;
    analyser.recompute()?;
    println!("Best under 0.5: {:.4}", analyser.max_similarity()?);

    Ok(())
}
