pub mod lot_candidate_repository;
