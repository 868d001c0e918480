extern crate dwtflow;

use dwtflow::prelude::*;
use dwtflow::block::{BitPlaneCoder, BlockCoder, BlockStore, CodeBlock};
use dwtflow::kernel::LiftingStep;
use dwtflow::line::{Representation, Sample};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};


/// Push all rows of an image through an analysis tree,
/// then pull them back out of a synthesis tree reading the same code-blocks.
fn round_trip<R: Representation>(
    setup: &TreeSetup, decomposition: &Decomposition, size: Vec2<usize>,
    image: &[R::Sample], token: Option<&ThreadToken>,
) -> dwtflow::error::Result<Vec<R::Sample>>
{
    let mut arena = SampleArena::new();
    let mut analysis = PushStage::new(&mut arena, setup, decomposition, 0, size, token)?;
    let mut synthesis = PullStage::new(&mut arena, setup, decomposition, 0, size, token)?;
    let mut line = LineBuffer::declare(&mut arena, size.width(), 0, 0, R::TYPE)?;

    arena.finalize()?;
    let mut materializer = arena.materializer()?;
    analysis.bind(&mut materializer)?;
    synthesis.bind(&mut materializer)?;
    line.bind(&mut materializer)?;

    for row in image.chunks_exact(size.width()) {
        line.view_mut::<R>()?.nominal_mut().copy_from_slice(row);
        analysis.push(&line, token)?;
    }

    assert_eq!(analysis.state(), NodeState::Finished);
    synthesis.start(token)?;

    let mut output = Vec::with_capacity(image.len());
    for _ in 0 .. size.height() {
        synthesis.pull(&mut line, token)?;
        output.extend_from_slice(line.view::<R>()?.nominal());
    }

    assert_eq!(synthesis.state(), NodeState::Finished);
    Ok(output)
}

fn random_image<T: Sample>(seed: u64, size: Vec2<usize>, range: i32) -> Vec<T> {
    let mut random = StdRng::seed_from_u64(seed);
    (0 .. size.area()).map(|_| T::from_i32(random.random_range(-range ..= range))).collect()
}

fn decompositions() -> Vec<Decomposition> {
    let mixed = Decomposition::Split {
        split: Split::Both,
        bands: vec![
            Decomposition::dyadic(Split::Horizontal, 2),
            Decomposition::dyadic(Split::Vertical, 1),
            Decomposition::Leaf,
            Decomposition::dyadic(Split::None, 1),
        ],
    };

    vec![
        Decomposition::Leaf,
        Decomposition::mallat(1),
        Decomposition::mallat(4),
        Decomposition::dyadic(Split::Horizontal, 3),
        Decomposition::dyadic(Split::Vertical, 3),
        mixed,
    ]
}

fn tokens() -> Vec<Option<ThreadToken>> {
    vec![
        None,
        Some(ThreadToken::sequential()),
        Some(ThreadToken::thread_pool(3).unwrap()),
    ]
}


#[test]
fn reversible_round_trips_are_exact() {
    let sizes = [ Vec2(1, 1), Vec2(2, 7), Vec2(17, 3), Vec2(40, 33) ];
    let extensions = [ BoundaryExtension::Symmetric, BoundaryExtension::Replicate ];

    let mut cases = Vec::new();
    for decomposition in decompositions() {
        for &size in &sizes {
            for &extension in &extensions {
                for token in tokens() {
                    cases.push((decomposition.clone(), size, extension, token));
                }
            }
        }
    }

    cases.into_par_iter().enumerate().for_each(|(index, (decomposition, size, extension, token))| {
        let kernel = Kernel::w5x3().with_extension(extension);

        {
            let (codec, _) = Codec::in_memory();
            let options = TreeOptions::reversible(true).with_block_size(Vec2(8, 4));
            let setup = TreeSetup::new(kernel.clone(), options, codec);

            let image = random_image::<i16>(index as u64, size, 2000);
            let result = round_trip::<Absolute16>(&setup, &decomposition, size, &image, token.as_ref()).unwrap();
            assert_eq!(result, image, "16-bit {:?} of size {:?} with {:?}", decomposition, size, extension);
        }

        {
            let (codec, _) = Codec::in_memory();
            let setup = TreeSetup::new(kernel, TreeOptions::reversible(false), codec);

            let image = random_image::<i32>(index as u64 + 1000, size, 1 << 20);
            let result = round_trip::<Absolute32>(&setup, &decomposition, size, &image, token.as_ref()).unwrap();
            assert_eq!(result, image, "32-bit {:?} of size {:?} with {:?}", decomposition, size, extension);
        }
    });
}

#[test]
fn irreversible_round_trips_are_close() {
    let size = Vec2(37, 21);

    for (seed, token) in tokens().into_iter().enumerate() {
        for extension in [ BoundaryExtension::Symmetric, BoundaryExtension::Replicate ] {
            let kernel = Kernel::w9x7().with_extension(extension);
            let decomposition = Decomposition::mallat(3);

            let mut random = StdRng::seed_from_u64(seed as u64);
            let values: Vec<f32> = (0 .. size.area()).map(|_| random.random_range(-0.25 ..= 0.25)).collect();

            {
                let (codec, _) = Codec::in_memory();
                let options = TreeOptions::irreversible(false).with_step_size(1.0 / 4096.0);
                let setup = TreeSetup::new(kernel.clone(), options, codec);

                let result = round_trip::<Float32>(&setup, &decomposition, size, &values, token.as_ref()).unwrap();
                for (&restored, &original) in result.iter().zip(&values) {
                    assert!((restored - original).abs() < 0.02, "{} restored as {}", original, restored);
                }
            }

            {
                let (codec, _) = Codec::in_memory();
                let options = TreeOptions::irreversible(true).with_step_size(1.0 / 4096.0);
                let setup = TreeSetup::new(kernel, options, codec);

                let fixed: Vec<i16> = values.iter().map(|&value| (value * 8192.0).round() as i16).collect();
                let result = round_trip::<Fixed16>(&setup, &decomposition, size, &fixed, token.as_ref()).unwrap();

                for (&restored, &original) in result.iter().zip(&fixed) {
                    let difference = (i32::from(restored) - i32::from(original)).abs();
                    assert!(difference < (0.02 * 8192.0) as i32, "{} restored as {}", original, restored);
                }
            }
        }
    }
}

#[test]
fn custom_reversible_kernels_round_trip_exactly() {
    let w13x7 = Kernel::new(&[
        LiftingStep::reversible(-1, &[0.0625, -0.5625, -0.5625, 0.0625], 4, 8),
        LiftingStep::reversible(-2, &[-0.03125, 0.28125, 0.28125, -0.03125], 5, 16),
    ], true, 1.0, 1.0).unwrap();

    let three_steps = Kernel::new(&[
        LiftingStep::reversible(0, &[-0.5, -0.5], 1, 1),
        LiftingStep::reversible(-1, &[0.25, 0.25], 2, 2),
        LiftingStep::reversible(0, &[0.5, -0.5], 1, 0),
    ], true, 1.0, 1.0).unwrap();

    let offset_support = Kernel::new(&[
        LiftingStep::reversible(1, &[-1.0], 0, 0),
        LiftingStep::reversible(0, &[0.5], 1, 1),
    ], true, 1.0, 1.0).unwrap();

    let decompositions = [
        Decomposition::mallat(3),
        Decomposition::dyadic(Split::Vertical, 2),
        Decomposition::dyadic(Split::Horizontal, 2),
    ];

    let sizes = [ Vec2(1, 1), Vec2(3, 2), Vec2(8, 5), Vec2(31, 7) ];

    for (kernel_index, kernel) in [ w13x7, three_steps, offset_support ].into_iter().enumerate() {
        for extension in [ BoundaryExtension::Symmetric, BoundaryExtension::Replicate ] {
            for decomposition in &decompositions {
                for &size in &sizes {
                    let (codec, _) = Codec::in_memory();
                    let setup = TreeSetup::new(kernel.clone().with_extension(extension), TreeOptions::reversible(false), codec);

                    let image = random_image::<i32>(kernel_index as u64, size, 4000);
                    let result = round_trip::<Absolute32>(&setup, decomposition, size, &image, None).unwrap();
                    assert_eq!(result, image, "kernel {} {:?} of size {:?} with {:?}", kernel_index, decomposition, size, extension);
                }
            }
        }
    }
}

#[test]
fn constant_tile_keeps_energy_in_the_lowest_band() {
    let size = Vec2(16, 16);
    let decomposition = Decomposition::mallat(3);
    let image = vec![100_i32; size.area()];

    for token in tokens() {
        let (codec, store) = Codec::in_memory();
        let setup = TreeSetup::new(Kernel::w5x3(), TreeOptions::reversible(false), codec);

        let result = round_trip::<Absolute32>(&setup, &decomposition, size, &image, token.as_ref()).unwrap();
        assert_eq!(result, image);

        let leaves = decomposition.leaves(0, size);
        assert_eq!(leaves.len(), 10);

        for band in leaves {
            let id = BlockId { component: 0, band: band.path.clone(), position: Vec2(0, 0) };
            let mut block = CodeBlock::zero(id.clone(), band.size);
            BitPlaneCoder.decode(&store.load(&id).unwrap(), &mut block).unwrap();

            if band.path.as_slice() == [0, 0, 0] {
                assert_eq!(band.size, Vec2(2, 2));
                assert_eq!(block.coefficients, vec![100; 4]);
            }
            else {
                assert!(block.coefficients.iter().all(|&coefficient| coefficient == 0), "band {:?}", band.path);
            }
        }
    }
}

#[test]
fn trees_can_share_one_arena() {
    let (codec, _) = Codec::in_memory();
    let setup = TreeSetup::new(Kernel::w5x3(), TreeOptions::reversible(false), codec);
    let decomposition = Decomposition::mallat(2);

    let sizes = [ Vec2(11, 6), Vec2(4, 9) ];
    let images: Vec<Vec<i32>> = sizes.iter().enumerate()
        .map(|(component, &size)| random_image(component as u64, size, 500))
        .collect();

    let mut arena = SampleArena::new();

    let mut analysis: Vec<PushStage<'_>> = sizes.iter().enumerate()
        .map(|(component, &size)| PushStage::new(&mut arena, &setup, &decomposition, component, size, None).unwrap())
        .collect();

    let mut synthesis: Vec<PullStage<'_>> = sizes.iter().enumerate()
        .map(|(component, &size)| PullStage::new(&mut arena, &setup, &decomposition, component, size, None).unwrap())
        .collect();

    let mut lines: Vec<LineBuffer<'_>> = sizes.iter()
        .map(|size| LineBuffer::declare(&mut arena, size.width(), 0, 0, SampleType::I32).unwrap())
        .collect();

    arena.finalize().unwrap();
    let mut materializer = arena.materializer().unwrap();
    for tree in &mut analysis { tree.bind(&mut materializer).unwrap(); }
    for tree in &mut synthesis { tree.bind(&mut materializer).unwrap(); }
    for line in &mut lines { line.bind(&mut materializer).unwrap(); }
    assert_eq!(materializer.remaining_bytes(), 0);

    // interleave the components row by row
    for row in 0 .. 9 {
        for component in 0 .. 2 {
            let size = sizes[component];
            if row >= size.height() { continue; }

            let source = &images[component][row * size.width() .. (row + 1) * size.width()];
            lines[component].view_mut::<Absolute32>().unwrap().nominal_mut().copy_from_slice(source);
            analysis[component].push(&lines[component], None).unwrap();
        }
    }

    for component in 0 .. 2 {
        let size = sizes[component];

        for row in 0 .. size.height() {
            synthesis[component].pull(&mut lines[component], None).unwrap();
            let expected = &images[component][row * size.width() .. (row + 1) * size.width()];
            assert_eq!(lines[component].view::<Absolute32>().unwrap().nominal(), expected);
        }
    }
}
