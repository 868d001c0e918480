extern crate dwtflow;

use dwtflow::prelude::*;


fn fill(line: &mut LineBuffer<'_>, row: usize) {
    for (column, sample) in line.view_mut::<Absolute32>().unwrap().nominal_mut().iter_mut().enumerate() {
        *sample = (row * 7 + column * 3) as i32 % 50;
    }
}

fn reversible_setup() -> (TreeSetup, std::sync::Arc<MemoryStore>) {
    let (codec, store) = Codec::in_memory();
    let options = TreeOptions::reversible(false).with_block_size(Vec2(4, 4));
    (TreeSetup::new(Kernel::w5x3(), options, codec), store)
}


#[test]
fn rows_beyond_the_height_are_rejected() {
    let (setup, _) = reversible_setup();
    let decomposition = Decomposition::mallat(2);
    let size = Vec2(9, 5);

    let mut arena = SampleArena::new();
    let mut analysis = PushStage::new(&mut arena, &setup, &decomposition, 0, size, None).unwrap();
    let mut synthesis = PullStage::new(&mut arena, &setup, &decomposition, 0, size, None).unwrap();
    let mut line = LineBuffer::declare(&mut arena, 9, 0, 0, SampleType::I32).unwrap();
    arena.finalize().unwrap();

    let mut materializer = arena.materializer().unwrap();
    analysis.bind(&mut materializer).unwrap();
    synthesis.bind(&mut materializer).unwrap();
    line.bind(&mut materializer).unwrap();

    for row in 0 .. 5 {
        fill(&mut line, row);
        analysis.push(&line, None).unwrap();
    }

    assert!(matches!(analysis.push(&line, None), Err(Error::Contract(_))));

    for _ in 0 .. 5 { synthesis.pull(&mut line, None).unwrap(); }
    assert!(matches!(synthesis.pull(&mut line, None), Err(Error::Contract(_))));
    assert_eq!(synthesis.state(), NodeState::Finished);
}

#[test]
fn lines_must_match_the_tree() {
    let (setup, _) = reversible_setup();

    let mut arena = SampleArena::new();
    let mut analysis = PushStage::new(&mut arena, &setup, &Decomposition::mallat(1), 0, Vec2(6, 6), None).unwrap();
    let mut shorts = LineBuffer::declare(&mut arena, 6, 0, 0, SampleType::I16).unwrap();
    let unbound = LineBuffer::declare(&mut arena, 6, 0, 0, SampleType::I32).unwrap();
    arena.finalize().unwrap();

    let mut materializer = arena.materializer().unwrap();
    analysis.bind(&mut materializer).unwrap();
    shorts.bind(&mut materializer).unwrap();

    let error = analysis.push(&shorts, None).unwrap_err();
    assert!(matches!(error, Error::TypeMismatch { expected: SampleType::I32, found: SampleType::I16 }));
    assert!(error.is_contract_violation());

    assert!(matches!(analysis.push(&unbound, None), Err(Error::Contract(_))));
}

#[test]
fn invalid_configurations_are_rejected() {
    let (codec, _) = Codec::in_memory();
    let mut arena = SampleArena::new();

    let mismatched = TreeSetup::new(Kernel::w5x3(), TreeOptions::irreversible(false), codec.clone());
    let result = PushStage::new(&mut arena, &mismatched, &Decomposition::mallat(1), 0, Vec2(4, 4), None);
    assert!(matches!(result, Err(Error::Invalid(_))));

    let broken = Decomposition::Split { split: Split::Both, bands: vec![ Decomposition::Leaf ] };
    let setup = TreeSetup::new(Kernel::w5x3(), TreeOptions::reversible(false), codec);
    let result = PullStage::new(&mut arena, &setup, &broken, 0, Vec2(4, 4), None);
    assert!(matches!(result, Err(Error::Invalid(_))));
}

#[cfg(feature = "rayon")]
#[test]
fn multi_threaded_trees_require_a_token() {
    let (setup, _) = reversible_setup();
    let token = ThreadToken::thread_pool(2).unwrap();

    let mut arena = SampleArena::new();
    let mut analysis = PushStage::new(&mut arena, &setup, &Decomposition::mallat(1), 0, Vec2(8, 2), Some(&token)).unwrap();
    let mut line = LineBuffer::declare(&mut arena, 8, 0, 0, SampleType::I32).unwrap();
    arena.finalize().unwrap();

    let mut materializer = arena.materializer().unwrap();
    analysis.bind(&mut materializer).unwrap();
    line.bind(&mut materializer).unwrap();

    assert!(matches!(analysis.push(&line, None), Err(Error::Contract(_))));
    assert_eq!(analysis.state(), NodeState::Constructed);

    analysis.push(&line, Some(&token)).unwrap();
    analysis.push(&line, Some(&token)).unwrap();
    assert_eq!(analysis.state(), NodeState::Finished);
}

#[test]
fn decode_faults_name_the_corrupt_block() {
    let (setup, store) = reversible_setup();
    let decomposition = Decomposition::mallat(1);
    let size = Vec2(8, 8);

    let mut arena = SampleArena::new();
    let mut analysis = PushStage::new(&mut arena, &setup, &decomposition, 4, size, None).unwrap();
    let mut synthesis = PullStage::new(&mut arena, &setup, &decomposition, 4, size, None).unwrap();
    let mut line = LineBuffer::declare(&mut arena, 8, 0, 0, SampleType::I32).unwrap();
    arena.finalize().unwrap();

    let mut materializer = arena.materializer().unwrap();
    analysis.bind(&mut materializer).unwrap();
    synthesis.bind(&mut materializer).unwrap();
    line.bind(&mut materializer).unwrap();

    for row in 0 .. 8 {
        fill(&mut line, row);
        analysis.push(&line, None).unwrap();
    }

    // the high-pass band of the first level
    let corrupt = BlockId { component: 4, band: smallvec::smallvec![3], position: Vec2(0, 0) };
    assert!(store.update(&corrupt, |block| block.bit_planes = 40).unwrap());

    let error = (0 .. 8)
        .find_map(|_| synthesis.pull(&mut line, None).err())
        .expect("corrupt block was not detected");

    match error {
        Error::Decode { block, .. } => assert_eq!(block, corrupt),
        other => panic!("unexpected error {:?}", other),
    }

    assert_eq!(synthesis.state(), NodeState::Failed);
    assert!(synthesis.pull(&mut line, None).unwrap_err().is_contract_violation());
}

#[test]
fn arena_memory_is_reused_after_restart() {
    let (setup, _) = reversible_setup();
    let decomposition = Decomposition::mallat(3);
    let mut arena = SampleArena::new();

    for (iteration, size) in [ Vec2(32, 32), Vec2(24, 16), Vec2(32, 32) ].into_iter().enumerate() {
        {
            let mut analysis = PushStage::new(&mut arena, &setup, &decomposition, 0, size, None).unwrap();
            let mut line = LineBuffer::declare(&mut arena, size.width(), 0, 0, SampleType::I32).unwrap();
            arena.finalize().unwrap();

            let mut materializer = arena.materializer().unwrap();
            analysis.bind(&mut materializer).unwrap();
            line.bind(&mut materializer).unwrap();

            for row in 0 .. size.height() {
                fill(&mut line, row);
                analysis.push(&line, None).unwrap();
            }

            assert_eq!(analysis.state(), NodeState::Finished, "iteration {}", iteration);
        }

        assert_eq!(arena.allocation_count(), 1);
        arena.restart();
    }

    assert!(arena.capacity_bytes() > 0);
    assert_eq!(arena.reserved_bytes(), 0);
}
