use assert_matches::assert_matches;
use strata_integration_tests::Tester;
use strata_materializer::{
    Attributes, Materializer, MaterializerSettings, StreamFailure, SupervisionDecider,
};
use strata_pipeline::{Collect, IterSource, Pipeline, TryMap};

fn reject_multiples_of_three(x: u32) -> anyhow::Result<u32> {
    if x % 3 == 0 {
        anyhow::bail!("{x} is a multiple of three");
    }
    Ok(x)
}

#[test_log::test(tokio::test)]
async fn stopping_decider_fails_the_flow() -> anyhow::Result<()> {
    let tester = Tester::setup()?;
    let completion = tester.materializer.materialize(
        Pipeline::new()
            .pipe(IterSource::new(1..10u32))
            .pipe(TryMap::stateless(reject_multiples_of_three))
            .to(Collect::new()),
    )?;
    let failure = completion.await.unwrap_err();
    assert_matches!(failure, StreamFailure::Stage { stage, .. } if stage == "flow-1-1-try-map");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn stage_attribute_overrides_base_decider() -> anyhow::Result<()> {
    let tester = Tester::setup()?;
    let completion = tester.materializer.materialize(
        Pipeline::new()
            .pipe(IterSource::new(1..10u32))
            .pipe(
                TryMap::stateless(reject_multiples_of_three).with_attributes(
                    Attributes::supervision_strategy(SupervisionDecider::resuming()),
                ),
            )
            .to(Collect::new()),
    )?;
    assert_eq!(completion.await?, vec![1, 2, 4, 5, 7, 8]);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn restarting_decider_resets_stage_state() -> anyhow::Result<()> {
    let settings =
        MaterializerSettings::default().with_supervision_decider(SupervisionDecider::restarting());
    let tester = Tester::with_settings(settings)?;
    let running_sum = TryMap::new(
        || 0u32,
        |sum: &mut u32, x: u32| {
            if x == 0 {
                anyhow::bail!("reset");
            }
            *sum += x;
            Ok(*sum)
        },
    );
    let completion = tester.materializer.materialize(
        Pipeline::new()
            .pipe(IterSource::new([1, 2, 0, 3, 4]))
            .pipe(running_sum)
            .to(Collect::new()),
    )?;
    assert_eq!(completion.await?, vec![1, 3, 3, 7]);
    Ok(())
}
