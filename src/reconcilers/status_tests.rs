// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{Binding, BindingSpec, BindingStatus};
    use crate::reconcilers::status::{desired_status, status_changed};

    fn binding(generation: i64, status: Option<BindingStatus>) -> Binding {
        let mut binding = Binding::new("b1", BindingSpec::default());
        binding.metadata.generation = Some(generation);
        binding.status = status;
        binding
    }

    #[test]
    fn test_desired_status_uses_generation() {
        let status = desired_status(&binding(7, None), vec!["oops".to_string()]);
        assert_eq!(status.observed_generation, 7);
        assert_eq!(status.errors, vec!["oops".to_string()]);
    }

    #[test]
    fn test_status_unchanged() {
        let current = BindingStatus {
            observed_generation: 3,
            errors: vec![],
        };
        let b = binding(3, Some(current.clone()));
        assert!(!status_changed(&b, &current));
    }

    #[test]
    fn test_generation_change_is_a_change() {
        let b = binding(
            4,
            Some(BindingStatus {
                observed_generation: 3,
                errors: vec![],
            }),
        );
        assert!(status_changed(&b, &desired_status(&b, vec![])));
    }

    #[test]
    fn test_errors_change_is_a_change() {
        let b = binding(
            3,
            Some(BindingStatus {
                observed_generation: 3,
                errors: vec!["old".to_string()],
            }),
        );
        assert!(status_changed(&b, &desired_status(&b, vec![])));
        assert!(!status_changed(
            &b,
            &desired_status(&b, vec!["old".to_string()])
        ));
    }

    #[test]
    fn test_missing_status_equals_default() {
        let b = binding(0, None);
        assert!(!status_changed(&b, &desired_status(&b, vec![])));
        let b = binding(1, None);
        assert!(status_changed(&b, &desired_status(&b, vec![])));
    }
}
