//! Concentrated-liquidity pool helpers used when wiring Velodrome positions.

use alloy::{
    primitives::{
        aliases::{I24, U160},
        Address, U256, U512,
    },
    providers::Provider,
};
use anyhow::{anyhow, ensure, Context, Result};
use vault_contract_adapter::sol_types::{IVelodromeCLFactory, IVelodromeCLPool};

/// Round `tick` down to a multiple of `spacing`.
///
/// Fails if `spacing` is not positive or the rounded tick does not fit an `i32`.
pub fn convert_current_tick(tick: i32, spacing: i32) -> Result<i32> {
    ensure!(spacing > 0, "tick spacing must be positive, got {spacing}");
    tick.checked_sub(tick.rem_euclid(spacing))
        .with_context(|| format!("tick {tick} cannot be rounded to spacing {spacing}"))
}

/// Price of token0 in token1, scaled by 1e18.
pub fn price_from_sqrt_price_x96(sqrt_price_x96: U160) -> U256 {
    // sqrt^2 * 1e18 takes up to 380 bits, the shifted result at most 188.
    let sqrt = U512::from(sqrt_price_x96);
    let price: U512 = (sqrt * sqrt * U512::from(10u64).pow(U512::from(18))) >> 192;
    price.saturating_to::<U256>()
}

async fn pool_address(
    provider: impl Provider,
    factory: Address,
    token0: Address,
    token1: Address,
    spacing: i32,
) -> Result<Address> {
    let tick_spacing =
        I24::try_from(spacing).map_err(|_| anyhow!("tick spacing {spacing} out of range"))?;
    let pool = IVelodromeCLFactory::new(factory, provider)
        .getPool(token0, token1, tick_spacing)
        .call()
        .await
        .context("getPool failed")?
        .pool;
    ensure!(
        pool != Address::ZERO,
        "Invalid pool: no pool for {token0:#x}/{token1:#x} with spacing {spacing}"
    );
    Ok(pool)
}

/// Current tick of the pool, rounded down to its spacing.
pub async fn current_tick(
    provider: impl Provider,
    factory: Address,
    token0: Address,
    token1: Address,
    spacing: i32,
) -> Result<i32> {
    let pool = pool_address(&provider, factory, token0, token1, spacing).await?;
    let slot0 = IVelodromeCLPool::new(pool, &provider)
        .slot0()
        .call()
        .await
        .context("slot0 failed")?;
    convert_current_tick(slot0.tick.as_i32(), spacing)
}

pub async fn current_sqrt_price_x96(
    provider: impl Provider,
    factory: Address,
    token0: Address,
    token1: Address,
    spacing: i32,
) -> Result<U160> {
    let pool = pool_address(&provider, factory, token0, token1, spacing).await?;
    let slot0 = IVelodromeCLPool::new(pool, &provider)
        .slot0()
        .call()
        .await
        .context("slot0 failed")?;
    Ok(slot0.sqrtPriceX96)
}

#[cfg(test)]
mod tests {
    use alloy::{
        primitives::Bytes, providers::ProviderBuilder, sol_types::SolCall,
        transports::mock::Asserter,
    };
    use rstest::rstest;

    use super::*;

    const FACTORY: Address = Address::new([0x72; 20]);
    const POOL: Address = Address::new([0x70; 20]);
    const WETH: Address = Address::new([0x42; 20]);
    const USDC: Address = Address::new([0x0b; 20]);

    fn push_pool(asserter: &Asserter, pool: Address) {
        let ret = IVelodromeCLFactory::getPoolCall::abi_encode_returns(&(pool,));
        asserter.push_success(&Bytes::from(ret));
    }

    fn push_slot0(asserter: &Asserter, sqrt_price_x96: U160, tick: i32) {
        let ret = IVelodromeCLPool::slot0Call::abi_encode_returns(&(
            sqrt_price_x96,
            I24::try_from(tick).unwrap(),
            0u16,
            1u16,
            1u16,
            true,
        ));
        asserter.push_success(&Bytes::from(ret));
    }

    #[rstest]
    #[case(0, 60, 0)]
    #[case(125, 60, 120)]
    #[case(120, 60, 120)]
    #[case(-1, 60, -60)]
    #[case(-125, 60, -180)]
    #[case(887_271, 200, 887_200)]
    #[case(-887_271, 1, -887_271)]
    #[case(i32::MIN, 1, i32::MIN)]
    fn test_convert_current_tick(#[case] tick: i32, #[case] spacing: i32, #[case] expected: i32) {
        let rounded = convert_current_tick(tick, spacing).unwrap();
        assert_eq!(rounded, expected);
        assert_eq!(rounded % spacing, 0);
        assert!(rounded <= tick);
        assert!(i64::from(tick) - i64::from(rounded) < i64::from(spacing));
    }

    #[rstest]
    #[case(125, 0)]
    #[case(125, -60)]
    #[case(i32::MIN + 1, 60)]
    fn test_convert_current_tick_rejects(#[case] tick: i32, #[case] spacing: i32) {
        assert!(convert_current_tick(tick, spacing).is_err());
    }

    #[rstest]
    #[case::parity(U160::from(1u8) << 96, U256::from(1_000_000_000_000_000_000u128))]
    #[case::four(U160::from(2u8) << 96, U256::from(4_000_000_000_000_000_000u128))]
    #[case::wide(
        U160::from(1u8) << 120,
        U256::from(281_474_976_710_656_000_000_000_000_000_000u128)
    )]
    fn test_price_from_sqrt_price_x96(#[case] sqrt_price_x96: U160, #[case] expected: U256) {
        assert_eq!(price_from_sqrt_price_x96(sqrt_price_x96), expected);
    }

    #[test]
    fn test_price_at_max_sqrt_price_does_not_overflow() {
        let price = price_from_sqrt_price_x96(U160::MAX);
        let sqrt = U512::from(U160::MAX);
        let expected = (sqrt * sqrt * U512::from(10u64).pow(U512::from(18))) >> 192;
        assert_eq!(U512::from(price), expected);
    }

    #[tokio::test]
    async fn test_current_tick_rounds_down() {
        let asserter = Asserter::new();
        push_pool(&asserter, POOL);
        push_slot0(&asserter, U160::from(1u8) << 96, -125);
        let provider = ProviderBuilder::new().on_mocked_client(asserter.clone());

        let tick = current_tick(&provider, FACTORY, WETH, USDC, 60).await.unwrap();
        assert_eq!(tick, -180);
        assert!(asserter.read_q().is_empty());
    }

    #[tokio::test]
    async fn test_current_sqrt_price() {
        let asserter = Asserter::new();
        let sqrt_price_x96 = U160::from(3u8) << 95;
        push_pool(&asserter, POOL);
        push_slot0(&asserter, sqrt_price_x96, 7);
        let provider = ProviderBuilder::new().on_mocked_client(asserter);

        let got = current_sqrt_price_x96(&provider, FACTORY, WETH, USDC, 100)
            .await
            .unwrap();
        assert_eq!(got, sqrt_price_x96);
    }

    #[tokio::test]
    async fn test_missing_pool_is_invalid() {
        let asserter = Asserter::new();
        push_pool(&asserter, Address::ZERO);
        let provider = ProviderBuilder::new().on_mocked_client(asserter);

        let err = current_tick(&provider, FACTORY, WETH, USDC, 60)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid pool"), "{err:#}");
    }
}
