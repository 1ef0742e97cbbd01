use ndarray::{ArrayD, IxDyn};
use proptest::prelude::*;
use pybase_transform::{create_new_key, scale_array, transform, InputMapping};

fn shaped_values() -> impl Strategy<Value = ArrayD<f64>> {
    prop::collection::vec(1usize..5, 1..4).prop_flat_map(|shape| {
        let len = shape.iter().product::<usize>();
        prop::collection::vec(-1e6f64..1e6, len).prop_map(move |data| {
            ArrayD::from_shape_vec(IxDyn(&shape), data).expect("shape matches data length")
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn transform_suffixes_every_key_and_scales_every_value(
        entries in prop::collection::btree_map("[a-z]{1,8}", shaped_values(), 0..6),
    ) {
        let input: InputMapping = entries
            .iter()
            .map(|(key, array)| (key.clone(), array.clone().into()))
            .collect();
        let output = transform(&input).unwrap();

        prop_assert_eq!(output.len(), entries.len());
        for (key, array) in &entries {
            let derived = &output[&format!("{key}_new")];
            prop_assert_eq!(derived.shape(), array.shape());
            for (got, value) in derived.iter().zip(array.iter()) {
                prop_assert!((got - value * 0.3).abs() <= 1e-9 * value.abs().max(1.0));
            }
        }
    }

    #[test]
    fn scale_array_is_elementwise(
        array in shaped_values(),
        factor in -100.0f64..100.0,
    ) {
        let scaled = scale_array(array.clone(), factor).unwrap();
        prop_assert_eq!(scaled.shape(), array.shape());
        for (got, value) in scaled.iter().zip(array.iter()) {
            prop_assert_eq!(*got, value * factor);
        }
    }

    #[test]
    fn create_new_key_is_plain_concatenation(key in ".*", suffix in ".*") {
        let joined = create_new_key(&key, &suffix).unwrap();
        prop_assert!(joined.starts_with(&key));
        prop_assert!(joined.ends_with(&suffix));
        prop_assert_eq!(joined.len(), key.len() + suffix.len());
    }
}
