use crate::models::membership::Decision;
use crate::models::users::Users;

/// Admits a join request when the user is known and has at least `required`
/// referrals. `is_approved` is bookkeeping only and never consulted.
pub fn decide(users: &Users, user_id: &str, required: usize) -> Decision {
    match users.get(user_id) {
        Some(record) if record.referral_count() >= required => Decision::Approve,
        Some(_) => Decision::Decline,
        None => Decision::Decline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::UserRecord;

    fn users(id: &str, referrals: usize) -> Users {
        let mut record = UserRecord::default();
        record.referrals = (0..referrals).map(|i| format!("10{}", i)).collect();
        Users::from([(id.to_string(), record)])
    }

    #[test]
    fn unknown_user_is_declined() {
        assert_eq!(decide(&Users::new(), "1", 3), Decision::Decline);
    }

    #[test]
    fn threshold_gates_admission() {
        assert_eq!(decide(&users("1", 2), "1", 3), Decision::Decline);
        assert_eq!(decide(&users("1", 3), "1", 3), Decision::Approve);
        assert_eq!(decide(&users("1", 7), "1", 3), Decision::Approve);
    }

    #[test]
    fn approval_flag_does_not_gate() {
        let mut users = users("1", 1);
        users.get_mut("1").unwrap().is_approved = true;
        assert_eq!(decide(&users, "1", 3), Decision::Decline);
    }
}
