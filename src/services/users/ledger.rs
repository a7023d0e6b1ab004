use crate::models::referrals::ReferralOutcome;
use crate::models::users::Users;
use crate::settings::Referrals;

/// Referral codes are the referrer's numeric platform id.
pub fn is_well_formed(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit())
}

/// Credits `new_user_id` to the referrer named by `referral_code` and
/// classifies the event.
///
/// Notification eligibility is decided from the referrer's count *before*
/// this credit: below `required` the event is progress or the crossing,
/// at or above it the credit is silent. `Invalid` and `AlreadyCredited`
/// leave `users` untouched; every other outcome mutates it and must be
/// persisted by the caller.
pub fn process_referral(
    users: &mut Users,
    new_user_id: &str,
    referral_code: &str,
    policy: &Referrals,
) -> ReferralOutcome {
    if !is_well_formed(referral_code) || referral_code == new_user_id {
        log::info!(
            "Invalid referral code {:?} from {}.",
            referral_code,
            new_user_id
        );
        return ReferralOutcome::Invalid;
    }

    let Some(referrer) = users.get_mut(referral_code) else {
        log::info!(
            "Unknown referrer {} for {}.",
            referral_code,
            new_user_id
        );
        return ReferralOutcome::Invalid;
    };

    if referrer.has_referred(new_user_id) {
        log::info!(
            "{} is already credited to {}.",
            new_user_id,
            referral_code
        );
        return ReferralOutcome::AlreadyCredited;
    }

    let prior_count = referrer.referral_count();
    referrer.referrals.push(new_user_id.to_string());
    referrer.points += policy.points;
    let new_count = referrer.referral_count();

    log::info!(
        "Referral for {}: {} -> {} referrals.",
        referral_code,
        prior_count,
        new_count
    );

    if prior_count >= policy.required {
        ReferralOutcome::SilentIncrement
    } else if new_count < policy.required {
        ReferralOutcome::ProgressUpdate {
            referrals: new_count,
            points: referrer.points,
        }
    } else {
        ReferralOutcome::ThresholdReached {
            points: referrer.points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::UserRecord;

    const POLICY: Referrals = Referrals {
        required: 3,
        points: 1,
    };

    fn users_with(id: &str, referrals: &[&str]) -> Users {
        let mut record = UserRecord::default();
        record.referrals = referrals.iter().map(|r| r.to_string()).collect();
        record.points = referrals.len() as u64;
        let mut users = Users::new();
        users.insert(id.to_string(), record);
        users
    }

    #[test]
    fn walks_through_progress_crossing_and_silence() {
        let mut users = users_with("1", &[]);

        let outcomes: Vec<_> = ["2", "3", "4", "5"]
            .iter()
            .map(|referee| process_referral(&mut users, referee, "1", &POLICY))
            .collect();

        assert_eq!(
            outcomes,
            vec![
                ReferralOutcome::ProgressUpdate {
                    referrals: 1,
                    points: 1
                },
                ReferralOutcome::ProgressUpdate {
                    referrals: 2,
                    points: 2
                },
                ReferralOutcome::ThresholdReached { points: 3 },
                ReferralOutcome::SilentIncrement,
            ]
        );
        assert_eq!(users["1"].referrals, vec!["2", "3", "4", "5"]);
        assert_eq!(users["1"].points, 4);
    }

    #[test]
    fn crossing_fires_once() {
        let mut users = users_with("1", &["2", "3"]);

        assert_eq!(
            process_referral(&mut users, "4", "1", &POLICY),
            ReferralOutcome::ThresholdReached { points: 3 }
        );
        let snapshot = users.clone();
        assert_eq!(
            process_referral(&mut users, "4", "1", &POLICY),
            ReferralOutcome::AlreadyCredited
        );
        assert_eq!(users, snapshot);
        assert_eq!(
            process_referral(&mut users, "5", "1", &POLICY),
            ReferralOutcome::SilentIncrement
        );
    }

    #[test]
    fn silent_credit_still_grows_state() {
        let mut users = users_with("1", &["2", "3", "4", "5", "6"]);

        assert_eq!(
            process_referral(&mut users, "7", "1", &POLICY),
            ReferralOutcome::SilentIncrement
        );
        assert_eq!(users["1"].referral_count(), 6);
        assert_eq!(users["1"].points, 6);
    }

    #[test]
    fn rejects_self_unknown_and_malformed_codes() {
        let mut users = users_with("1", &[]);
        let snapshot = users.clone();

        assert_eq!(
            process_referral(&mut users, "1", "1", &POLICY),
            ReferralOutcome::Invalid
        );
        // Self-referral is rejected even when the id is unknown.
        assert_eq!(
            process_referral(&mut users, "8", "8", &POLICY),
            ReferralOutcome::Invalid
        );
        assert_eq!(
            process_referral(&mut users, "2", "404", &POLICY),
            ReferralOutcome::Invalid
        );
        assert_eq!(
            process_referral(&mut users, "2", "1abc", &POLICY),
            ReferralOutcome::Invalid
        );
        assert_eq!(
            process_referral(&mut users, "2", "", &POLICY),
            ReferralOutcome::Invalid
        );
        assert_eq!(users, snapshot);
    }

    #[test]
    fn points_follow_the_configured_award() {
        let policy = Referrals {
            required: 2,
            points: 5,
        };
        let mut users = users_with("1", &[]);

        assert_eq!(
            process_referral(&mut users, "2", "1", &policy),
            ReferralOutcome::ProgressUpdate {
                referrals: 1,
                points: 5
            }
        );
        assert_eq!(
            process_referral(&mut users, "3", "1", &policy),
            ReferralOutcome::ThresholdReached { points: 10 }
        );
    }

    #[test]
    fn threshold_of_one_crosses_on_first_credit() {
        let policy = Referrals {
            required: 1,
            points: 1,
        };
        let mut users = users_with("1", &[]);

        assert_eq!(
            process_referral(&mut users, "2", "1", &policy),
            ReferralOutcome::ThresholdReached { points: 1 }
        );
        assert_eq!(
            process_referral(&mut users, "3", "1", &policy),
            ReferralOutcome::SilentIncrement
        );
    }
}
