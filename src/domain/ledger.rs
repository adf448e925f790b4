use super::{AccountId, Cents, Movement, WideCents};

/// Signed sum of a set of movements: credits minus debits.
pub fn net_effect(movements: &[Movement]) -> WideCents {
    movements.iter().fold(0, |total, movement| {
        total + WideCents::from(movement.signed_amount())
    })
}

/// The balance an account must have given its opening balance and its movements.
pub fn expected_balance(opening_balance: Cents, movements: &[Movement]) -> WideCents {
    WideCents::from(opening_balance) + net_effect(movements)
}

/// Order in which a unit of work must lock two accounts.
///
/// Locks are always taken in ascending id order, whichever account is the
/// source and whichever the destination, so two opposite transfers between the
/// same pair can never wait on each other in a cycle.
pub fn lock_order(a: AccountId, b: AccountId) -> [AccountId; 2] {
    if a <= b { [a, b] } else { [b, a] }
}

/// Recorded balance vs what the movement log says it should be.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BalanceDrift {
    pub account_id: AccountId,
    pub account_number: String,
    pub recorded: Cents,
    pub expected: WideCents,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::domain::MovementType;

    fn make_movement(
        account_id: AccountId,
        movement_type: MovementType,
        amount: Cents,
    ) -> Movement {
        Movement {
            id: Uuid::new_v4(),
            sequence: 0,
            account_id,
            movement_type,
            amount,
            description: None,
            channel: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_net_effect_empty() {
        assert_eq!(net_effect(&[]), 0);
    }

    #[test]
    fn test_expected_balance_mixed() {
        let account = Uuid::new_v4();
        let movements = vec![
            make_movement(account, MovementType::Credit, 5000), // +5000
            make_movement(account, MovementType::Debit, 1500),  // -1500
            make_movement(account, MovementType::Debit, 500),   // -500
        ];

        assert_eq!(net_effect(&movements), 3000);
        assert_eq!(expected_balance(10000, &movements), 13000);
    }

    #[test]
    fn test_transfer_legs_cancel_out() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let legs = vec![
            make_movement(a, MovementType::Debit, 4000),
            make_movement(b, MovementType::Credit, 4000),
        ];

        assert_eq!(net_effect(&legs), 0);
    }

    #[test]
    fn test_net_effect_does_not_overflow() {
        let account = Uuid::new_v4();
        let movements = vec![
            make_movement(account, MovementType::Credit, Cents::MAX),
            make_movement(account, MovementType::Credit, Cents::MAX),
        ];

        assert_eq!(net_effect(&movements), WideCents::from(Cents::MAX) * 2);
    }

    #[test]
    fn test_lock_order_ignores_direction() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(lock_order(a, b), lock_order(b, a));
        let [first, second] = lock_order(a, b);
        assert!(first <= second);
    }
}
